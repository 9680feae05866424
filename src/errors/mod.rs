mod airgap_error;

pub use airgap_error::{AirgapError, AirgapErrorKind};
