// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Error type shared by every layer of the binding
//!
//! Native failures keep the raw `CK_RV` together with the name of the
//! cryptoki function that returned it, local failures (bad arguments,
//! unloaded modules, disposed parameters, configuration problems) carry a
//! kind and a message and never touch the module.

use std::error;
use std::fmt;

use pkcs11::layout::LayoutError;
use pkcs11::{rv_name, CKR_GENERAL_ERROR, CKR_HOST_MEMORY, CKR_OK, CK_RV};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    origin: Option<Box<dyn error::Error + Send + Sync>>,
    errmsg: Option<String>,
    ckrv: CK_RV,
    function: Option<&'static str>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ErrorKind {
    /* A Cryptoki error, see the ckrv and function fields */
    CkError,
    /* The caller misused the API, nothing was sent to the module */
    Usage,
    /* Access to marshaled parameters after they were disposed */
    Disposed,
    /* Platform detection or configuration failure */
    Config,
    /* The module could not be found or loaded */
    Loader,
    /* A required entry point is missing */
    SymbolNotFound,
    /* An optional vendor entry point is missing */
    Unsupported,
    /* Other error, see origin */
    Nested,
}

impl Error {
    fn with_kind(kind: ErrorKind, errmsg: String) -> Error {
        Error {
            kind: kind,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: CKR_GENERAL_ERROR,
            function: None,
        }
    }

    pub fn ck_rv(ckrv: CK_RV) -> Error {
        Error {
            kind: ErrorKind::CkError,
            origin: None,
            errmsg: None,
            ckrv: ckrv,
            function: None,
        }
    }

    /// A non-OK status returned by a named cryptoki function
    pub fn ck_fn(function: &'static str, ckrv: CK_RV) -> Error {
        Error {
            kind: ErrorKind::CkError,
            origin: None,
            errmsg: None,
            ckrv: ckrv,
            function: Some(function),
        }
    }

    pub fn ck_rv_with_errmsg(ckrv: CK_RV, errmsg: String) -> Error {
        Error {
            kind: ErrorKind::CkError,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: ckrv,
            function: None,
        }
    }

    pub fn host_memory(size: usize) -> Error {
        Error::ck_rv_with_errmsg(
            CKR_HOST_MEMORY,
            format!("failed to allocate {} bytes of unmanaged memory", size),
        )
    }

    pub fn usage(errmsg: String) -> Error {
        Error::with_kind(ErrorKind::Usage, errmsg)
    }

    pub fn disposed(what: &str) -> Error {
        Error::with_kind(
            ErrorKind::Disposed,
            format!("{} used after it was disposed", what),
        )
    }

    pub fn config(errmsg: String) -> Error {
        Error::with_kind(ErrorKind::Config, errmsg)
    }

    pub fn config_from_error<E>(error: E) -> Error
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            kind: ErrorKind::Config,
            origin: Some(error.into()),
            errmsg: None,
            ckrv: CKR_GENERAL_ERROR,
            function: None,
        }
    }

    pub fn loader(errmsg: String) -> Error {
        Error::with_kind(ErrorKind::Loader, errmsg)
    }

    pub fn symbol_not_found(function: &'static str, errmsg: String) -> Error {
        Error {
            kind: ErrorKind::SymbolNotFound,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: CKR_GENERAL_ERROR,
            function: Some(function),
        }
    }

    pub fn unsupported(function: &'static str) -> Error {
        Error {
            kind: ErrorKind::Unsupported,
            origin: None,
            errmsg: None,
            ckrv: CKR_GENERAL_ERROR,
            function: Some(function),
        }
    }

    pub fn other_error<E>(error: E) -> Error
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            kind: ErrorKind::Nested,
            origin: Some(error.into()),
            errmsg: None,
            ckrv: CKR_GENERAL_ERROR,
            function: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn rv(&self) -> CK_RV {
        self.ckrv
    }

    /// The cryptoki function the error is attributed to, if any
    pub fn function(&self) -> Option<&'static str> {
        self.function
    }

    /// True for native errors carrying exactly this status
    pub fn is_rv(&self, ckrv: CK_RV) -> bool {
        self.kind == ErrorKind::CkError && self.ckrv == ckrv
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(func) = self.function {
            write!(f, "{}: ", func)?;
        }
        match self.kind {
            ErrorKind::CkError => match self.errmsg {
                Some(ref e) => write!(f, "{} ({})", e, rv_name(self.ckrv)),
                None => write!(
                    f,
                    "{} ({:#x})",
                    rv_name(self.ckrv),
                    self.ckrv
                ),
            },
            ErrorKind::Unsupported => {
                write!(f, "not supported by this module")
            }
            ErrorKind::Nested | ErrorKind::Config
                if self.origin.is_some() =>
            {
                match self.origin {
                    Some(ref o) => o.fmt(f),
                    None => Ok(()),
                }
            }
            _ => match self.errmsg {
                Some(ref e) => write!(f, "{}", e),
                None => write!(f, "{:?}", self.kind),
            },
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.origin {
            Some(ref o) => Some(o.as_ref()),
            None => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::other_error(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Error {
        Error::config_from_error(error)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(error: std::num::TryFromIntError) -> Error {
        Error::usage(format!("integer conversion failed: {}", error))
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(error: std::ffi::NulError) -> Error {
        Error::usage(format!("embedded NUL in string argument: {}", error))
    }
}

impl From<LayoutError> for Error {
    fn from(error: LayoutError) -> Error {
        Error::usage(error.to_string())
    }
}

/// Maps a native status to `Ok(())` or to an error attributed to
/// `function`
pub fn ck_ok(function: &'static str, ckrv: CK_RV) -> Result<()> {
    if ckrv == CKR_OK {
        Ok(())
    } else {
        Err(Error::ck_fn(function, ckrv))
    }
}

#[macro_export]
macro_rules! err_rv {
    ($ck_err:expr) => {
        Err($crate::error::Error::ck_rv($ck_err))
    };
    ($func:expr, $ck_err:expr) => {
        Err($crate::error::Error::ck_fn($func, $ck_err))
    };
}

#[macro_export]
macro_rules! usage_err {
    ($($arg:tt)*) => {
        Err($crate::error::Error::usage(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkcs11::CKR_BUFFER_TOO_SMALL;

    #[test]
    fn display_names_function_and_rv() {
        let e = Error::ck_fn("C_GetAttributeValue", CKR_BUFFER_TOO_SMALL);
        assert_eq!(
            e.to_string(),
            "C_GetAttributeValue: CKR_BUFFER_TOO_SMALL (0x150)"
        );
        assert!(e.is_rv(CKR_BUFFER_TOO_SMALL));
        assert_eq!(e.function(), Some("C_GetAttributeValue"));

        let u = Error::unsupported("C_EjectToken");
        assert_eq!(u.kind(), ErrorKind::Unsupported);
        assert_eq!(u.to_string(), "C_EjectToken: not supported by this module");
    }

    #[test]
    fn conversions() {
        let e: Error = u32::try_from(u64::MAX).unwrap_err().into();
        assert_eq!(e.kind(), ErrorKind::Usage);
        let e: Error = LayoutError::Overflow(1 << 40).into();
        assert_eq!(e.kind(), ErrorKind::Usage);
        assert!(ck_ok("C_Login", CKR_OK).is_ok());
    }
}
