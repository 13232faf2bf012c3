use rayon::ThreadPoolBuildError;

#[derive(thiserror::Error, Debug)]
pub enum LockLiteError {
    #[error("max lock memory {requested} is below current lock memory {in_use}")]
    MaxLockMemoryOutOfRange { requested: u64, in_use: u64 },

    #[error("{0}")]
    SendError(#[from] crossbeam_channel::SendError<bool>),

    #[error("{0}")]
    ThreadPoolBuildError(#[from] ThreadPoolBuildError),

    #[error("{0}")]
    Custom(String),
}

impl PartialEq for LockLiteError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::MaxLockMemoryOutOfRange {
                    requested: r1,
                    in_use: u1,
                },
                Self::MaxLockMemoryOutOfRange {
                    requested: r2,
                    in_use: u2,
                },
            ) => r1 == r2 && u1 == u2,
            (Self::Custom(s1), Self::Custom(s2)) => s1.eq(s2),
            _ => false,
        }
    }
}
