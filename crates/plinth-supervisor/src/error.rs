//! Supervisor error taxonomy

use plinth_core::BuildError;
use plinth_hal::HalError;

/// Errors surfaced to the administrative interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HvError {
    /// Frame request exceeds the free pool; nothing was retained
    OutOfMemory,
    /// Bad magic or misaligned load address; rejected before allocation
    InvalidImage,
    /// Image exceeds half the allocated window; frames were released
    ImageTooLarge,
    /// No domain with the given identifier
    NotFound,
    /// Malformed administrative request
    BadRequest,
    /// Platform-layer failure
    Hal(HalError),
}

impl HvError {
    /// Diagnostic text for the administrative console.
    pub fn message(&self) -> &'static str {
        match self {
            HvError::OutOfMemory => "out of memory",
            HvError::InvalidImage => "invalid guest image",
            HvError::ImageTooLarge => "guest image too large",
            HvError::NotFound => "no such domain",
            HvError::BadRequest => "bad request",
            HvError::Hal(_) => "platform error",
        }
    }
}

impl From<BuildError> for HvError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::OutOfMemory => HvError::OutOfMemory,
            BuildError::InvalidImage => HvError::InvalidImage,
            BuildError::ImageTooLarge => HvError::ImageTooLarge,
        }
    }
}

impl From<HalError> for HvError {
    fn from(e: HalError) -> Self {
        HvError::Hal(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_errors_map_one_to_one() {
        assert_eq!(HvError::from(BuildError::OutOfMemory), HvError::OutOfMemory);
        assert_eq!(
            HvError::from(BuildError::InvalidImage),
            HvError::InvalidImage
        );
        assert_eq!(
            HvError::from(BuildError::ImageTooLarge),
            HvError::ImageTooLarge
        );
    }

    #[test]
    fn messages_are_stable() {
        assert_eq!(HvError::NotFound.message(), "no such domain");
    }
}
