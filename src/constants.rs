//! Consensus and policy constants

/// Base units per coin
pub const COIN: i64 = 100_000_000;

/// Maximum money supply
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Maximum transaction size: 1MB
pub const MAX_TX_SIZE: usize = 1_000_000;

/// Maximum number of inputs per transaction
pub const MAX_INPUTS: usize = 1000;

/// Maximum number of outputs per transaction
pub const MAX_OUTPUTS: usize = 1000;

/// Maximum script length
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum size of a single pushed stack element
///
/// Large enough for any name value, so name outputs stay spendable.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 2048;

/// Maximum stack size during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of non-push operations in a script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Maximum length of a registered name
pub const MAX_NAME_LENGTH: usize = 256;

/// Maximum length of a name's value
pub const MAX_VALUE_LENGTH: usize = 2048;

const _: () = assert!(MAX_NAME_LENGTH <= MAX_SCRIPT_ELEMENT_SIZE);
const _: () = assert!(MAX_VALUE_LENGTH <= MAX_SCRIPT_ELEMENT_SIZE);

/// Coins locked in every name output
pub const NAME_LOCKED_AMOUNT: i64 = COIN / 100;

/// Height at which segregated witness activates on the test chain
pub const SEGWIT_ACTIVATION_HEIGHT: u64 = 432;

/// Regtest proof-of-work limit in compact form
pub const POW_LIMIT_BITS: u64 = 0x207fffff;

/// Block reward paid to the coinbase
pub const BLOCK_SUBSIDY: i64 = 50 * COIN;

/// Number of headers used for the median time past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Magic bytes following OP_RETURN in a witness commitment output
pub const WITNESS_COMMITMENT_HEADER: [u8; 4] = [0xaa, 0x21, 0xa9, 0xed];

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Timestamp of the genesis block
pub const GENESIS_TIMESTAMP: u64 = 1_531_470_713;
