//! 进程退出码

use std::fmt;

/// 测试运行的退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    TestError = 21,
    EnvironmentError = 40,
    ArgumentsError = 41,
    InputMissingError = 42,
    InputFormatError = 43,
    InternalError = 50,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// 取最严重的退出码
    pub fn worst<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        codes.into_iter().max().unwrap_or(Self::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::TestError => "TEST_ERROR",
            Self::EnvironmentError => "ENVIRONMENT_ERROR",
            Self::ArgumentsError => "ARGUMENTS_ERROR",
            Self::InputMissingError => "INPUT_MISSING_ERROR",
            Self::InputFormatError => "INPUT_FORMAT_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::TestError.code(), 21);
        assert_eq!(ErrorCode::InputFormatError.code(), 43);
        assert_eq!(ErrorCode::InternalError.code(), 50);
        assert_eq!(ErrorCode::InputFormatError.to_string(), "INPUT_FORMAT_ERROR (43)");
    }

    #[test]
    fn test_worst() {
        assert_eq!(ErrorCode::worst([]), ErrorCode::Success);
        assert_eq!(
            ErrorCode::worst([ErrorCode::TestError, ErrorCode::Success, ErrorCode::InputMissingError]),
            ErrorCode::InputMissingError
        );
    }
}
