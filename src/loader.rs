// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Loading of cryptoki modules as shared objects

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use log::{debug, warn};

#[cfg(unix)]
mod imp {
    use std::ffi::{c_void, CStr, CString};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use crate::error::{Error, Result};

    pub fn dl_error() -> String {
        let cstr = unsafe { libc::dlerror() };
        if cstr.is_null() {
            String::from("<none>")
        } else {
            unsafe {
                String::from_utf8_lossy(CStr::from_ptr(cstr).to_bytes())
                    .to_string()
            }
        }
    }

    pub struct Handle(*mut c_void);

    impl Handle {
        pub fn open(path: &Path) -> Result<Handle> {
            let cpath = CString::new(path.as_os_str().as_bytes())?;
            let handle = unsafe {
                libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL)
            };
            if handle.is_null() {
                return Err(Error::loader(format!(
                    "failed to load {}: {}",
                    path.display(),
                    dl_error()
                )));
            }
            Ok(Handle(handle))
        }

        pub fn symbol(
            &self,
            name: &str,
        ) -> std::result::Result<*const c_void, String> {
            let cname = CString::new(name).map_err(|e| e.to_string())?;
            /* clear any stale error first, a NULL symbol is only an error
             * if dlerror() says so */
            let _ = dl_error();
            let ptr = unsafe { libc::dlsym(self.0, cname.as_ptr()) };
            if ptr.is_null() {
                return Err(dl_error());
            }
            Ok(ptr as *const c_void)
        }

        pub fn close(self) -> Result<()> {
            if unsafe { libc::dlclose(self.0) } != 0 {
                return Err(Error::loader(format!(
                    "dlclose failed: {}",
                    dl_error()
                )));
            }
            Ok(())
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::path::Path;

    use crate::error::{Error, Result};

    pub struct Handle(libloading::Library);

    impl Handle {
        pub fn open(path: &Path) -> Result<Handle> {
            match unsafe { libloading::Library::new(path) } {
                Ok(lib) => Ok(Handle(lib)),
                Err(e) => Err(Error::loader(format!(
                    "failed to load {}: {}",
                    path.display(),
                    e
                ))),
            }
        }

        pub fn symbol(
            &self,
            name: &str,
        ) -> std::result::Result<*const c_void, String> {
            let sym = unsafe {
                self.0
                    .get::<*const c_void>(name.as_bytes())
                    .map_err(|e| e.to_string())?
            };
            Ok(*sym)
        }

        pub fn close(self) -> Result<()> {
            self.0.close().map_err(|e| {
                Error::loader(format!("FreeLibrary failed: {}", e))
            })
        }
    }
}

/// A loaded cryptoki module
///
/// The OS handle is released exactly once, either by [NativeLibrary::unload]
/// or when the value is dropped.
pub struct NativeLibrary {
    path: PathBuf,
    handle: Option<imp::Handle>,
}

/* dlopen handles and module function pointers may be used from any
 * thread */
unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}

impl NativeLibrary {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<NativeLibrary> {
        let path = path.as_ref();
        /* Bare names are left to the system search path */
        if path.components().count() > 1 && !path.exists() {
            return Err(Error::loader(format!(
                "module {} not found",
                path.display()
            )));
        }
        let handle = imp::Handle::open(path)?;
        debug!("loaded cryptoki module {}", path.display());
        Ok(NativeLibrary {
            path: path.to_path_buf(),
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    /// Looks up an exported symbol
    pub fn resolve(&self, name: &'static str) -> Result<*const c_void> {
        match self.handle {
            Some(ref h) => h.symbol(name).map_err(|e| {
                Error::symbol_not_found(
                    name,
                    format!("not exported by {}: {}", self.path.display(), e),
                )
            }),
            None => Err(Error::usage(format!(
                "cannot resolve {}, {} was unloaded",
                name,
                self.path.display()
            ))),
        }
    }

    /// Unloads the module, further calls are no-ops
    pub fn unload(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(h) => {
                debug!("unloading cryptoki module {}", self.path.display());
                h.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        if let Err(e) = self.unload() {
            warn!("{}", e);
        }
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn missing_module() {
        let err = NativeLibrary::load("/nonexistent/dir/libnothing.so")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Loader);
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn resolve_and_unload() {
        let mut lib = NativeLibrary::load("libc.so.6").unwrap();
        assert!(!lib.resolve("strlen").unwrap().is_null());

        let err = lib.resolve("C_NoSuchFunction").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SymbolNotFound);
        assert_eq!(err.function(), Some("C_NoSuchFunction"));

        lib.unload().unwrap();
        lib.unload().unwrap();
        assert!(!lib.is_loaded());
        let err = lib.resolve("strlen").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
