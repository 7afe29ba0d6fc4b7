//! ethereum constants for the deposit pools

/// keccak256("Deposit(bytes32,uint32,uint256)")
pub const DEPOSIT_TOPIC: &str =
    "0xa945e51eec50ab98c161376f0db4cf2aeba3ec92755fe2fcd388bdbbb80ff196";

/// selector of `levels()`
pub const LEVELS_SELECTOR: &str = "0x4ecf518b";

/// selector of `ZERO_VALUE()`
pub const ZERO_VALUE_SELECTOR: &str = "0xec732959";

pub const DEFAULT_DB_PATH: &str = "./alibi.db";

/// compute units a node provider grants per second
pub const DEFAULT_COMPUTE_UNITS: u32 = alibi_core::limiter::DEFAULT_COMPUTE_UNITS_PER_SECOND;
