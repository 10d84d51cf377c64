use jig_types::error::TypesError;
use jig_types::instruction::Instruction;
use jig_types::primitives::PublicKey;
use jig_types::tx::Tx;

use crate::keys::{batch_verify, Keypair};

/// Verify every `SIGN`/`SIGNTO` instruction of a transaction and return
/// the verified signer set in instruction order.
pub fn verify_tx(tx: &Tx) -> Result<Vec<PublicKey>, TypesError> {
    let sigs = tx.signatures()?;
    let messages: Vec<&[u8]> = sigs.iter().map(|s| s.message.as_slice()).collect();
    let signatures: Vec<_> = sigs.iter().map(|s| s.sig).collect();
    let pubkeys: Vec<PublicKey> = sigs.iter().map(|s| s.pubkey).collect();
    batch_verify(&messages, &signatures, &pubkeys)?;
    Ok(pubkeys)
}

/// Append a `SIGN` instruction covering every non-signature instruction.
pub fn sign_tx(tx: &mut Tx, keypair: &Keypair) -> Result<(), TypesError> {
    let message = tx.sighash()?;
    tx.instructions.push(Instruction::Sign {
        sig: keypair.sign(&message),
        pubkey: keypair.public_key(),
    });
    Ok(())
}

/// Append a `SIGNTO` instruction covering everything before it.
pub fn sign_tx_to(tx: &mut Tx, keypair: &Keypair) -> Result<(), TypesError> {
    let message = tx.sighash_to(tx.instructions.len())?;
    tx.instructions.push(Instruction::SignTo {
        sig: keypair.sign(&message),
        pubkey: keypair.public_key(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_tx() -> Tx {
        Tx::new(vec![
            Instruction::Import { pkg_id: [1u8; 32] },
            Instruction::Lock {
                idx: 0,
                address: [2u8; 20],
            },
        ])
    }

    #[test]
    fn test_sign_and_verify() {
        let kp1 = Keypair::from_seed(&[1u8; 32]);
        let kp2 = Keypair::from_seed(&[2u8; 32]);
        let mut tx = base_tx();
        sign_tx_to(&mut tx, &kp1).unwrap();
        sign_tx(&mut tx, &kp2).unwrap();
        let signers = verify_tx(&tx).unwrap();
        assert_eq!(signers, vec![kp1.public_key(), kp2.public_key()]);
    }

    #[test]
    fn test_sign_survives_appended_signatures() {
        let kp1 = Keypair::from_seed(&[1u8; 32]);
        let kp2 = Keypair::from_seed(&[2u8; 32]);
        let mut tx = base_tx();
        sign_tx(&mut tx, &kp1).unwrap();
        sign_tx(&mut tx, &kp2).unwrap();
        assert_eq!(verify_tx(&tx).unwrap().len(), 2);
    }

    #[test]
    fn test_tampered_tx_rejected() {
        let kp = Keypair::from_seed(&[1u8; 32]);
        let mut tx = base_tx();
        sign_tx(&mut tx, &kp).unwrap();
        tx.instructions[1] = Instruction::Lock {
            idx: 0,
            address: [9u8; 20],
        };
        match verify_tx(&tx).unwrap_err() {
            TypesError::InvalidSignature { signer_index } => assert_eq!(signer_index, 0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsigned_tx_has_no_signers() {
        assert!(verify_tx(&base_tx()).unwrap().is_empty());
    }
}
