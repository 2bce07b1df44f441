//! P2SH hash-time-locked scripts for Bitcoin-style chains.
//!
//! The redeem script pays the beneficiary when given a preimage and a
//! signature, or the depositor once the absolute block-height lock time has
//! passed:
//!
//! ```text
//! OP_IF
//!     OP_SIZE 32 OP_EQUALVERIFY <OP_HASH160|OP_SHA256> <hashlock> OP_EQUALVERIFY <beneficiary>
//! OP_ELSE
//!     <locktime> OP_CHECKLOCKTIMEVERIFY OP_DROP <depositor>
//! OP_ENDIF
//! OP_CHECKSIG
//! ```

use bitcoin::absolute::LockTime;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CLTV, OP_DROP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF,
    OP_PUSHNUM_1, OP_SHA256, OP_SIZE,
};
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, Instruction, PushBytes, Script, ScriptBuf};
use bitcoin::PublicKey;
use htlc_core::{
    ChainFamily, ChainInfo, DepositHandle, DepositRequest, DepositStatus, EscrowDeposit, Error,
    Hashlock, Result, Secret,
};
use std::str::FromStr;

use crate::connector::{ChainCall, Confirmation};
use crate::escrow::{EscrowCodec, OnChainState};

const SECRET_LEN: i64 = 32;

fn push_bytes(data: &[u8]) -> Result<&PushBytes> {
    <&PushBytes>::try_from(data).map_err(|e| Error::InvalidEncoding(format!("script push: {}", e)))
}

fn pubkey(raw: &str, role: &str) -> Result<PublicKey> {
    let key = PublicKey::from_str(raw.trim())
        .map_err(|_| Error::RejectedByChain(format!("{} {} is not a public key", role, raw)))?;
    if !key.compressed {
        return Err(Error::RejectedByChain(format!(
            "{} {} is not a compressed public key",
            role, raw
        )));
    }
    Ok(key)
}

fn lock_height(value: u64) -> Result<LockTime> {
    u32::try_from(value)
        .ok()
        .and_then(|height| LockTime::from_height(height).ok())
        .ok_or_else(|| {
            Error::RejectedByChain(format!("lock height {} is not a block height", value))
        })
}

fn hash_opcode(family: ChainFamily) -> Result<Opcode> {
    match family {
        ChainFamily::Utxo => Ok(OP_HASH160),
        ChainFamily::Cosmos => Ok(OP_SHA256),
        ChainFamily::Evm => Err(Error::RejectedByChain(
            "script has no keccak256 opcode".to_string(),
        )),
    }
}

/// OP_1 selects the claim branch, an empty push the refund branch
fn selects_branch(instruction: &Instruction<'_>) -> bool {
    match instruction {
        Instruction::Op(op) => *op == OP_PUSHNUM_1,
        Instruction::PushBytes(data) => data.is_empty(),
    }
}

/// Parameters of one HTLC redeem script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcScript {
    pub hashlock: Hashlock,
    pub commitment_family: ChainFamily,
    pub beneficiary: PublicKey,
    pub depositor: PublicKey,
    pub lock_time: LockTime,
}

impl HtlcScript {
    fn from_parts(
        hashlock: &Hashlock,
        commitment_family: ChainFamily,
        beneficiary: &str,
        depositor: &str,
        height: u64,
    ) -> Result<Self> {
        hash_opcode(commitment_family)?;
        Ok(Self {
            hashlock: hashlock.clone(),
            commitment_family,
            beneficiary: pubkey(beneficiary, "beneficiary")?,
            depositor: pubkey(depositor, "depositor")?,
            lock_time: lock_height(height)?,
        })
    }

    pub fn for_request(request: &DepositRequest) -> Result<Self> {
        Self::from_parts(
            &request.hashlock,
            request.commitment_family,
            &request.beneficiary,
            &request.depositor,
            request.timelock.value,
        )
    }

    pub fn for_deposit(deposit: &EscrowDeposit) -> Result<Self> {
        Self::from_parts(
            &deposit.hashlock,
            deposit.commitment_family,
            &deposit.beneficiary,
            &deposit.depositor,
            deposit.timelock.value,
        )
    }

    pub fn redeem_script(&self) -> Result<ScriptBuf> {
        Ok(Builder::new()
            .push_opcode(OP_IF)
            .push_opcode(OP_SIZE)
            .push_int(SECRET_LEN)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(hash_opcode(self.commitment_family)?)
            .push_slice(push_bytes(self.hashlock.as_bytes())?)
            .push_opcode(OP_EQUALVERIFY)
            .push_key(&self.beneficiary)
            .push_opcode(OP_ELSE)
            .push_lock_time(self.lock_time)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_key(&self.depositor)
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_CHECKSIG)
            .into_script())
    }

    /// P2SH output script paying to the redeem script
    pub fn script_pubkey(&self) -> Result<ScriptBuf> {
        Ok(ScriptBuf::new_p2sh(&self.redeem_script()?.script_hash()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct UtxoCodec;

impl UtxoCodec {
    pub fn new() -> Self {
        Self
    }
}

impl EscrowCodec for UtxoCodec {
    fn family(&self) -> ChainFamily {
        ChainFamily::Utxo
    }

    fn supports_commitment(&self, family: ChainFamily) -> bool {
        hash_opcode(family).is_ok()
    }

    fn validate_request(&self, _info: &ChainInfo, request: &DepositRequest) -> Result<()> {
        HtlcScript::for_request(request)?.redeem_script().map(|_| ())
    }

    fn encode_create(&self, request: &DepositRequest) -> Result<Vec<ChainCall>> {
        let script = HtlcScript::for_request(request)?;
        let output = hex::encode(script.script_pubkey()?.as_bytes());
        let call = ChainCall::new(output, script.redeem_script()?.into_bytes())
            .with_funds(request.token.denom.clone(), request.amount);
        Ok(vec![call])
    }

    fn encode_claim(&self, deposit: &EscrowDeposit, secret: &Secret) -> Result<ChainCall> {
        let redeem = HtlcScript::for_deposit(deposit)?.redeem_script()?;
        // signature is prepended by the signer
        let script_sig = Builder::new()
            .push_slice(push_bytes(secret.as_bytes())?)
            .push_opcode(OP_PUSHNUM_1)
            .push_slice(push_bytes(redeem.as_bytes())?)
            .into_script();
        Ok(ChainCall::new(deposit.handle.0.clone(), script_sig.into_bytes()))
    }

    fn encode_refund(&self, deposit: &EscrowDeposit) -> Result<ChainCall> {
        let script = HtlcScript::for_deposit(deposit)?;
        let redeem = script.redeem_script()?;
        let script_sig = Builder::new()
            .push_int(0)
            .push_slice(push_bytes(redeem.as_bytes())?)
            .into_script();
        Ok(ChainCall::new(deposit.handle.0.clone(), script_sig.into_bytes())
            .with_lock_time(u64::from(script.lock_time.to_consensus_u32())))
    }

    fn deposit_handle(
        &self,
        _request: &DepositRequest,
        confirmation: &Confirmation,
    ) -> Result<DepositHandle> {
        Ok(DepositHandle(format!("{}:0", confirmation.tx_hash)))
    }

    fn encode_lookup(&self, deposit: &EscrowDeposit) -> Result<(String, Vec<u8>)> {
        Ok((deposit.handle.0.clone(), Vec::new()))
    }

    /// `raw` is the scriptSig spending the outpoint, empty while unspent
    fn decode_state(&self, _deposit: &EscrowDeposit, raw: &[u8]) -> Result<OnChainState> {
        if raw.is_empty() {
            return Ok(OnChainState::funded());
        }

        let instructions = Script::from_bytes(raw)
            .instructions()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidEncoding(format!("spend script: {}", e)))?;
        // skip the signature if the spender included it
        let branch = instructions
            .iter()
            .rposition(selects_branch)
            .ok_or_else(|| Error::InvalidEncoding("spend has no branch selector".to_string()))?;

        let preimage = branch.checked_sub(1).map(|i| &instructions[i]);
        let (status, revealed) = match (&instructions[branch], preimage) {
            (Instruction::PushBytes(_), _) => (DepositStatus::Refunded, None),
            (Instruction::Op(_), Some(Instruction::PushBytes(preimage))) => {
                let bytes = <[u8; 32]>::try_from(preimage.as_bytes()).map_err(|_| {
                    Error::InvalidEncoding(format!("preimage of {} bytes", preimage.len()))
                })?;
                (DepositStatus::Claimed, Some(Secret::from_bytes(bytes)))
            }
            _ => {
                return Err(Error::InvalidEncoding(
                    "claim spend without preimage".to_string(),
                ))
            }
        };

        Ok(OnChainState {
            status,
            revealed,
            hashlock: None,
            timelock: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::OnChainEscrow;
    use crate::testkit::{FakeConnector, JsonSigner, START_HEIGHT};
    use bitcoin::hashes::{hash160, Hash};
    use ethers::types::U256;
    use htlc_core::{commit, ChainId, ChainRegistry, EscrowAdapter, Timelock, Token};
    use std::sync::Arc;

    // secp256k1 generator and its double
    const ALICE: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const BOB: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
    const ALICE_UNCOMPRESSED: &str = concat!(
        "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        "483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8"
    );

    fn request(secret: &Secret) -> DepositRequest {
        DepositRequest {
            depositor: ALICE.to_string(),
            beneficiary: BOB.to_string(),
            token: Token::new(ChainId::from(568), "DOGE"),
            amount: U256::from(50_000_000u64),
            hashlock: commit(secret, ChainFamily::Utxo),
            commitment_family: ChainFamily::Utxo,
            timelock: Timelock::height(START_HEIGHT + 120),
        }
    }

    fn adapter(connector: Arc<FakeConnector>) -> OnChainEscrow<UtxoCodec> {
        let info = ChainRegistry::default()
            .info(&ChainId::from(568))
            .unwrap()
            .clone();
        OnChainEscrow::new(info, UtxoCodec::new(), Arc::new(JsonSigner), connector).unwrap()
    }

    fn pushed<'a>(instruction: &Instruction<'a>) -> &'a [u8] {
        match *instruction {
            Instruction::PushBytes(data) => data.as_bytes(),
            Instruction::Op(op) => panic!("expected a push, got {:?}", op),
        }
    }

    #[test]
    fn test_redeem_script_layout() {
        let secret = Secret::from_bytes([9u8; 32]);
        let script = HtlcScript::for_request(&request(&secret)).unwrap();
        let redeem = script.redeem_script().unwrap();
        let ops: Vec<_> = redeem.instructions().map(|i| i.unwrap()).collect();

        assert_eq!(ops.len(), 15);
        assert_eq!(ops[0], Instruction::Op(OP_IF));
        assert_eq!(ops[1], Instruction::Op(OP_SIZE));
        assert_eq!(pushed(&ops[2]), &[0x20]);
        assert_eq!(ops[4], Instruction::Op(OP_HASH160));
        assert_eq!(
            pushed(&ops[5]),
            hash160::Hash::hash(secret.as_bytes()).as_byte_array()
        );
        assert_eq!(pushed(&ops[5]), commit(&secret, ChainFamily::Utxo).as_bytes());
        assert_eq!(pushed(&ops[7]), PublicKey::from_str(BOB).unwrap().to_bytes());
        assert_eq!(ops[8], Instruction::Op(OP_ELSE));
        assert_eq!(ops[10], Instruction::Op(OP_CLTV));
        assert_eq!(pushed(&ops[12]), PublicKey::from_str(ALICE).unwrap().to_bytes());
        assert_eq!(ops[14], Instruction::Op(OP_CHECKSIG));

        let output = script.script_pubkey().unwrap();
        assert!(output.is_p2sh());
        assert_eq!(output, ScriptBuf::new_p2sh(&redeem.script_hash()));
    }

    #[test]
    fn test_sha256_commitment_uses_op_sha256() {
        let secret = Secret::from_bytes([9u8; 32]);
        let mut req = request(&secret);
        req.commitment_family = ChainFamily::Cosmos;
        req.hashlock = commit(&secret, ChainFamily::Cosmos);

        let redeem = HtlcScript::for_request(&req).unwrap().redeem_script().unwrap();
        let ops: Vec<_> = redeem.instructions().map(|i| i.unwrap()).collect();
        assert_eq!(ops[4], Instruction::Op(OP_SHA256));
        assert_eq!(pushed(&ops[5]).len(), 32);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let secret = Secret::from_bytes([9u8; 32]);
        let codec = UtxoCodec::new();
        let info = ChainRegistry::default()
            .info(&ChainId::from(568))
            .unwrap()
            .clone();

        let mut uncompressed = request(&secret);
        uncompressed.beneficiary = ALICE_UNCOMPRESSED.to_string();
        assert!(codec.validate_request(&info, &uncompressed).is_err());

        let mut garbage = request(&secret);
        garbage.depositor = format!("02{}", "aa".repeat(32));
        assert!(codec.validate_request(&info, &garbage).is_err());

        // heights from 500_000_000 on are read as timestamps
        let mut far = request(&secret);
        far.timelock = Timelock::height(500_000_000);
        assert!(codec.validate_request(&info, &far).is_err());

        assert!(!codec.supports_commitment(ChainFamily::Evm));
        assert!(codec.supports_commitment(ChainFamily::Cosmos));
    }

    #[tokio::test]
    async fn test_claim_spend_reveals_secret() {
        let connector = Arc::new(FakeConnector::new(1_700_000_000));
        let escrow = adapter(connector.clone());
        let secret = Secret::from_bytes([9u8; 32]);

        let deposit = escrow.create_deposit(request(&secret)).await.unwrap();
        assert!(deposit.handle.0.ends_with(":0"));
        let funding = connector.submitted()[0].clone();
        assert!(Script::from_bytes(&hex::decode(&funding.target).unwrap()).is_p2sh());

        escrow.claim_with_secret(&deposit, &secret).await.unwrap();
        let spend = connector.submitted()[1].clone();
        assert_eq!(spend.target, deposit.handle.0);

        connector.set_state(&deposit.handle.0, spend.payload);
        assert_eq!(escrow.revealed_secret(&deposit).await.unwrap(), Some(secret));
        assert_eq!(
            escrow.fetch_deposit(&deposit).await.unwrap().status,
            DepositStatus::Claimed
        );
    }

    #[tokio::test]
    async fn test_refund_after_lock_height() {
        let connector = Arc::new(FakeConnector::new(1_700_000_000));
        let escrow = adapter(connector.clone());
        let deposit = escrow
            .create_deposit(request(&Secret::from_bytes([9u8; 32])))
            .await
            .unwrap();

        assert!(matches!(
            escrow.claim_after_timelock(&deposit).await,
            Err(Error::TimelockNotYetExpired { .. })
        ));

        connector.advance_blocks(120);
        escrow.claim_after_timelock(&deposit).await.unwrap();
        let spend = connector.submitted()[1].clone();
        assert_eq!(spend.lock_time, Some(START_HEIGHT + 120));
        let first = Script::from_bytes(&spend.payload).instructions().next();
        assert!(matches!(first, Some(Ok(Instruction::PushBytes(b))) if b.is_empty()));

        connector.set_state(&deposit.handle.0, spend.payload);
        assert!(matches!(
            escrow.claim_after_timelock(&deposit).await,
            Err(Error::DepositSettled(_))
        ));
        assert_eq!(escrow.revealed_secret(&deposit).await.unwrap(), None);
    }
}
