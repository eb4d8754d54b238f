// Tessera common library - main library exports

pub mod configuration;
pub mod hash;
pub mod types;

// Flattened re-exports
pub use self::configuration::{ChainParams, FinalityRuleKind};
pub use self::hash::{BlockHash, Hash, TxHash};
pub use self::types::*;
