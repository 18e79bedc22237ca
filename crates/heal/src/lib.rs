pub mod detach;
pub mod manager;
pub mod sealer;
pub mod state;

pub use detach::spawn_detached;
pub use manager::HealManager;
pub use sealer::{CredentialSealer, SealboxSealer, SEALED_PREFIX};
pub use state::{HealCommon, HealRequest, ProfileInitHeal, SearchHeal};
