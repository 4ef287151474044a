//! Dynamic Library Loader
//!
//! Thin wrapper around libloading for the engine shared libraries. A
//! library is opened once per connection; symbols resolve into typed
//! `extern "C"` function pointers that the API tables hold for the life
//! of the connection.

use std::ffi::CString;

use libloading::{Library, Symbol};

use super::FfiError;

/// A loaded engine library.
pub struct EngineLibrary {
    /// Product name the library was loaded for (`IRIS`, `Cache`,
    /// `YottaDB`), used in error messages
    product: String,
    /// Path the library was loaded from
    path: String,
    /// The loaded library handle; dropped last so resolved pointers
    /// never outlive it
    library: Library,
}

impl EngineLibrary {
    /// Open a shared library from an explicit path.
    pub fn open(product: &str, path: &str) -> Result<Self, libloading::Error> {
        // Safety: loading a database engine runs its initializers; the
        // path comes from the caller's open profile.
        let library = unsafe { Library::new(path)? };
        Ok(Self {
            product: product.to_string(),
            path: path.to_string(),
            library,
        })
    }

    /// Try each candidate path in order, keeping the first that loads.
    /// The failure message reports the first candidate, the way the
    /// engines' own tooling names the primary library.
    pub fn open_first(product: &str, candidates: &[String]) -> Result<Self, FfiError> {
        let mut last_error: Option<libloading::Error> = None;
        for path in candidates {
            match Self::open(product, path) {
                Ok(lib) => return Ok(lib),
                Err(err) => last_error = Some(err),
            }
        }
        let primary = candidates.first().map(String::as_str).unwrap_or("");
        let detail = last_error.map(|e| e.to_string());
        Err(FfiError::load_failure(product, primary, detail.as_deref()))
    }

    /// Product name for error messages.
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Correct the product name once the loaded path reveals which
    /// engine flavour actually answered the candidate search.
    pub fn set_product(&mut self, product: &str) {
        self.product = product.to_string();
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve a symbol into a typed function pointer, or None when the
    /// library does not export it.
    ///
    /// # Safety
    ///
    /// The caller pins `T` to the symbol's real C signature; nothing
    /// checks it. Every signature in `isc_api` / `ydb_api` mirrors the
    /// engine headers.
    pub unsafe fn fun<T: Copy>(&self, name: &str) -> Option<T> {
        debug_assert_eq!(std::mem::size_of::<T>(), std::mem::size_of::<*const ()>());
        let c_name = CString::new(name).ok()?;
        let symbol: Symbol<*const ()> = self.library.get(c_name.as_bytes_with_nul()).ok()?;
        let addr: *const () = *symbol;
        Some(std::mem::transmute_copy::<*const (), T>(&addr))
    }

    /// Resolve a symbol that must exist, with the missing-symbol error
    /// text on failure.
    ///
    /// # Safety
    ///
    /// Same contract as [`EngineLibrary::fun`].
    pub unsafe fn require<T: Copy>(&self, name: &str) -> Result<T, FfiError> {
        self.fun(name)
            .ok_or_else(|| FfiError::missing_symbol(&self.product, &self.path, name))
    }
}

impl std::fmt::Debug for EngineLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLibrary")
            .field("product", &self.product)
            .field("path", &self.path)
            .finish()
    }
}
