/// Errors shared by every origin calibration stage.
///
/// Per-position failures inside a batch never surface here; they become
/// invalid cells of a [`crate::MaskedField`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OriginError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{what} shape mismatch (expected {expected:?}, got {got:?})")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("no elements selected: {0}")]
    EmptySelection(&'static str),
    #[error("unsupported parameter combination: {0}")]
    UnsupportedCombination(String),
    #[error("invalid fit function '{0}' (expected plane, parabola or bezier_two)")]
    InvalidFitFunction(String),
}

impl OriginError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Fail with [`OriginError::ShapeMismatch`] unless `got == expected`.
    pub fn check_shape(
        what: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    ) -> Result<(), Self> {
        if expected == got {
            Ok(())
        } else {
            Err(Self::ShapeMismatch {
                what,
                expected,
                got,
            })
        }
    }
}
