//! Settlement transaction construction and signing
//!
//! A settlement is one Solana transaction carrying three instructions: a
//! system transfer of the amount to the treasury, a memo naming the
//! execution, and `record_job` on the MINT program. The job hash is derived
//! only from the execution, so every rebuild of one settlement writes the
//! same job account and at most one of them can land.

use crate::crypto::{hash_bytes, Keypair};
use crate::types::{Complexity, ExecutionRecord};
use crate::{Error, Result};
use mint_ledger::ExecutionId;
use solana_sdk::hash::Hash as Blockhash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use std::fmt;
use std::str::FromStr;

/// FoundryNet MINT program (mainnet)
pub const MINT_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("4ZvTZ3skfeMF3ZGyABoazPa9tiudw2QSwuVKn45t2AKL");

/// MINT program state account (mainnet)
pub const MINT_STATE_ACCOUNT: Pubkey =
    Pubkey::from_str_const("2Lm7hrtqK9W5tykVu4U37nUNJiiFh6WQ1rD8ZJWXomr2");

/// SPL memo program
pub const MEMO_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// System program
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0; 32]);

/// System instruction index of `Transfer`
const SYSTEM_TRANSFER: u32 = 2;

/// Instruction discriminator for `record_job`
pub const RECORD_JOB_DISCRIMINATOR: [u8; 8] = [0x36, 0x7c, 0xa8, 0x9e, 0xec, 0xed, 0x6b, 0xce];

/// Recent blockhash a transaction must carry to be accepted.
/// Fetched per attempt, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreshnessToken(Blockhash);

impl FreshnessToken {
    /// Wrap a blockhash returned by the network
    pub fn new(blockhash: Blockhash) -> Self {
        Self(blockhash)
    }

    /// Underlying blockhash
    pub fn blockhash(&self) -> &Blockhash {
        &self.0
    }
}

impl fmt::Display for FreshnessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FreshnessToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Blockhash::from_str(s)
            .map(Self)
            .map_err(|e| Error::Serialization(format!("Invalid blockhash {:?}: {}", s, e)))
    }
}

/// Job fields recorded on-chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// On-chain label
    pub job_name: String,
    /// Execution ID
    pub execution_id: ExecutionId,
    /// Metered whole seconds
    pub duration_secs: u64,
    /// Multiplier
    pub complexity: Complexity,
}

impl JobDescriptor {
    /// Describe a sealed execution
    pub fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            job_name: record.job_label(),
            execution_id: record.execution_id.clone(),
            duration_secs: record.duration_secs(),
            complexity: record.complexity,
        }
    }

    /// First 32 hex characters of `sha256(job_name|execution_id|duration)`
    pub fn job_hash(&self) -> String {
        let data = format!(
            "{}|{}|{}",
            self.job_name, self.execution_id, self.duration_secs
        );
        let mut hash = hex::encode(hash_bytes(data.as_bytes()));
        hash.truncate(32);
        hash
    }

    /// `record_job` instruction data: discriminator, length-prefixed job hash,
    /// duration (u64 LE), complexity in thousandths (u32 LE)
    pub fn record_job_data(&self) -> Vec<u8> {
        let job_hash = self.job_hash();
        let job_hash = job_hash.as_bytes();
        let mut data = Vec::with_capacity(8 + 4 + job_hash.len() + 8 + 4);
        data.extend_from_slice(&RECORD_JOB_DISCRIMINATOR);
        data.extend_from_slice(&(job_hash.len() as u32).to_le_bytes());
        data.extend_from_slice(job_hash);
        data.extend_from_slice(&self.duration_secs.to_le_bytes());
        data.extend_from_slice(&self.complexity.millis().to_le_bytes());
        data
    }
}

/// Memo attached to a settlement
pub fn settlement_memo(execution_id: &ExecutionId) -> String {
    format!("mint:{}", execution_id)
}

/// MINT program accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintProgram {
    /// Program ID
    pub program_id: Pubkey,
    /// Global state account
    pub state_account: Pubkey,
}

impl Default for MintProgram {
    fn default() -> Self {
        Self {
            program_id: MINT_PROGRAM_ID,
            state_account: MINT_STATE_ACCOUNT,
        }
    }
}

impl MintProgram {
    /// Per-operator machine account: seeds `["machine", operator]`
    pub fn machine_address(&self, operator: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[b"machine", operator.as_ref()], &self.program_id).0
    }

    /// Per-job account: seeds `["job", job_hash]`
    pub fn job_address(&self, job_hash: &str) -> Pubkey {
        Pubkey::find_program_address(&[b"job", job_hash.as_bytes()], &self.program_id).0
    }

    /// `record_job` instruction for `job`, signed by `operator`
    pub fn record_job(&self, operator: &Pubkey, job: &JobDescriptor) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.state_account, false),
                AccountMeta::new(self.machine_address(operator), false),
                AccountMeta::new(self.job_address(&job.job_hash()), false),
                AccountMeta::new_readonly(*operator, true),
                AccountMeta::new(*operator, true),
                AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            ],
            data: job.record_job_data(),
        }
    }
}

/// System transfer of `lamports` from `from` to `to`
pub fn transfer_instruction(from: &Pubkey, to: &Pubkey, lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![AccountMeta::new(*from, true), AccountMeta::new(*to, false)],
        data,
    }
}

/// Memo instruction signed by `signer`
pub fn memo_instruction(signer: &Pubkey, memo: &str) -> Instruction {
    Instruction {
        program_id: MEMO_PROGRAM_ID,
        accounts: vec![AccountMeta::new_readonly(*signer, true)],
        data: memo.as_bytes().to_vec(),
    }
}

/// What a settlement transaction pays and records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementDetails {
    /// Treasury receiving the amount
    pub destination: Pubkey,
    /// Amount in base units
    pub amount_base_units: u64,
    /// `mint:<execution_id>`
    pub memo: String,
    /// Deterministic job hash
    pub job_hash: String,
    /// Metered whole seconds
    pub duration_secs: u64,
    /// Complexity in thousandths
    pub complexity_millis: u32,
}

/// Transaction awaiting a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    /// Unsigned transaction, blockhash already set
    pub transaction: Transaction,
    /// Settlement fields
    pub details: SettlementDetails,
}

/// Signed transaction, ready to submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Signed transaction
    pub transaction: Transaction,
    /// Settlement fields
    pub details: SettlementDetails,
}

impl SignedTransaction {
    /// Fee payer signature (base58), the transaction's network identifier
    pub fn signature(&self) -> String {
        self.transaction
            .signatures
            .first()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Blockhash this transaction was signed against
    pub fn freshness(&self) -> FreshnessToken {
        FreshnessToken(self.transaction.message.recent_blockhash)
    }

    /// Serialized transaction as the network receives it
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.transaction)?)
    }

    /// Check every signature against its signer
    pub fn verify(&self) -> Result<()> {
        self.transaction
            .verify()
            .map_err(|e| Error::Signing(format!("Transaction does not verify: {}", e)))
    }
}

/// Builds and signs settlement transactions for one payer
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    payer: Pubkey,
    program: MintProgram,
}

impl TransactionBuilder {
    /// Builder for transactions paid by `payer`
    pub fn new(payer: Pubkey, program: MintProgram) -> Self {
        Self { payer, program }
    }

    /// Payer key
    pub fn payer(&self) -> Pubkey {
        self.payer
    }

    /// Build an unsigned transaction. Deterministic for identical inputs.
    pub fn build(
        &self,
        destination: Pubkey,
        amount_base_units: u64,
        memo: String,
        job: &JobDescriptor,
        freshness: FreshnessToken,
    ) -> UnsignedTransaction {
        let instructions = [
            transfer_instruction(&self.payer, &destination, amount_base_units),
            memo_instruction(&self.payer, &memo),
            self.program.record_job(&self.payer, job),
        ];
        let mut message = Message::new(&instructions, Some(&self.payer));
        message.recent_blockhash = *freshness.blockhash();

        UnsignedTransaction {
            transaction: Transaction::new_unsigned(message),
            details: SettlementDetails {
                destination,
                amount_base_units,
                memo,
                job_hash: job.job_hash(),
                duration_secs: job.duration_secs,
                complexity_millis: job.complexity.millis(),
            },
        }
    }

    /// Sign with `keypair`, which must be the payer
    pub fn sign(unsigned: UnsignedTransaction, keypair: &Keypair) -> Result<SignedTransaction> {
        let payer = unsigned.transaction.message.account_keys.first().copied();
        if payer != Some(keypair.public_key()) {
            return Err(Error::Signing(format!(
                "Payer {:?} does not match signing key {}",
                payer,
                keypair.public_key()
            )));
        }

        let mut transaction = unsigned.transaction;
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_sign(&[keypair.signer()], blockhash)
            .map_err(|e| Error::Signing(e.to_string()))?;

        let signed = SignedTransaction {
            transaction,
            details: unsigned.details,
        };
        signed.verify()?;
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> JobDescriptor {
        JobDescriptor {
            job_name: "summarize".to_string(),
            execution_id: ExecutionId::new("exec-1"),
            duration_secs: 30,
            complexity: Complexity::ONE,
        }
    }

    fn token(byte: u8) -> FreshnessToken {
        FreshnessToken::new(Blockhash::new_from_array([byte; 32]))
    }

    fn build_with(keypair: &Keypair, treasury: Pubkey, freshness: FreshnessToken) -> UnsignedTransaction {
        let job = test_job();
        TransactionBuilder::new(keypair.public_key(), MintProgram::default()).build(
            treasury,
            150_000_000,
            settlement_memo(&job.execution_id),
            &job,
            freshness,
        )
    }

    fn program_of(transaction: &Transaction, index: usize) -> Pubkey {
        let instruction = &transaction.message.instructions[index];
        transaction.message.account_keys[instruction.program_id_index as usize]
    }

    #[test]
    fn test_job_hash_deterministic() {
        let job = test_job();
        let hash = job.job_hash();
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, test_job().job_hash());

        let mut other = test_job();
        other.duration_secs = 31;
        assert_ne!(hash, other.job_hash());
    }

    #[test]
    fn test_build_deterministic() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let treasury = Keypair::from_seed(&[2u8; 32]).public_key();

        let tx1 = build_with(&keypair, treasury, token(1));
        let tx2 = build_with(&keypair, treasury, token(1));
        assert_eq!(tx1, tx2);
        assert_eq!(tx1.details.memo, "mint:exec-1");
        assert_eq!(tx1.details.complexity_millis, 1000);

        let signed1 = TransactionBuilder::sign(tx1, &keypair).unwrap();
        let signed2 = TransactionBuilder::sign(tx2, &keypair).unwrap();
        assert_eq!(signed1.signature(), signed2.signature());
        assert_eq!(signed1.freshness(), token(1));
    }

    #[test]
    fn test_fresh_token_changes_signature() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let treasury = Keypair::from_seed(&[2u8; 32]).public_key();

        let a = TransactionBuilder::sign(build_with(&keypair, treasury, token(1)), &keypair).unwrap();
        let b = TransactionBuilder::sign(build_with(&keypair, treasury, token(2)), &keypair).unwrap();
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.details.job_hash, b.details.job_hash);
    }

    #[test]
    fn test_sign_rejects_foreign_payer() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let other = Keypair::from_seed(&[9u8; 32]);
        let treasury = Keypair::from_seed(&[2u8; 32]).public_key();

        let tx = build_with(&keypair, treasury, token(1));
        let err = TransactionBuilder::sign(tx, &other).unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[test]
    fn test_instructions_transfer_memo_record_job() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let treasury = Keypair::from_seed(&[2u8; 32]).public_key();
        let signed = TransactionBuilder::sign(build_with(&keypair, treasury, token(1)), &keypair).unwrap();
        let tx = &signed.transaction;

        assert_eq!(tx.message.account_keys[0], keypair.public_key());
        assert_eq!(tx.message.instructions.len(), 3);

        assert_eq!(program_of(tx, 0), SYSTEM_PROGRAM_ID);
        let transfer = &tx.message.instructions[0].data;
        assert_eq!(&transfer[..4], &2u32.to_le_bytes());
        assert_eq!(&transfer[4..], &150_000_000u64.to_le_bytes());

        assert_eq!(program_of(tx, 1), MEMO_PROGRAM_ID);
        assert_eq!(tx.message.instructions[1].data, b"mint:exec-1".to_vec());

        assert_eq!(program_of(tx, 2), MINT_PROGRAM_ID);
        assert_eq!(tx.message.instructions[2].data, test_job().record_job_data());

        let program = MintProgram::default();
        let job_account = program.job_address(&test_job().job_hash());
        let machine_account = program.machine_address(&keypair.public_key());
        for account in [MINT_STATE_ACCOUNT, job_account, machine_account, treasury] {
            assert!(tx.message.account_keys.contains(&account));
        }
    }

    #[test]
    fn test_signature_is_base58_and_wire_decodes() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let treasury = Keypair::from_seed(&[2u8; 32]).public_key();
        let signed = TransactionBuilder::sign(build_with(&keypair, treasury, token(1)), &keypair).unwrap();

        let signature = solana_sdk::signature::Signature::from_str(&signed.signature()).unwrap();
        assert_eq!(signature, signed.transaction.signatures[0]);

        let decoded: Transaction = bincode::deserialize(&signed.to_wire().unwrap()).unwrap();
        assert_eq!(decoded, signed.transaction);
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn test_job_account_shared_across_rebuilds() {
        let program = MintProgram::default();
        let mut longer = test_job();
        longer.duration_secs = 60;

        assert_eq!(
            program.job_address(&test_job().job_hash()),
            program.job_address(&test_job().job_hash())
        );
        assert_ne!(
            program.job_address(&test_job().job_hash()),
            program.job_address(&longer.job_hash())
        );
    }

    #[test]
    fn test_record_job_data_layout() {
        let job = test_job();
        let data = job.record_job_data();

        assert_eq!(&data[..8], &RECORD_JOB_DISCRIMINATOR);
        assert_eq!(u32::from_le_bytes(data[8..12].try_into().unwrap()), 32);
        assert_eq!(&data[12..44], job.job_hash().as_bytes());
        assert_eq!(u64::from_le_bytes(data[44..52].try_into().unwrap()), 30);
        assert_eq!(u32::from_le_bytes(data[52..56].try_into().unwrap()), 1000);
        assert_eq!(data.len(), 56);
    }

    #[test]
    fn test_freshness_token_parse() {
        let token = token(7);
        assert_eq!(token.to_string().parse::<FreshnessToken>().unwrap(), token);
        assert!("not-a-hash".parse::<FreshnessToken>().is_err());
    }
}
