//! `#[repr(C)]` types shared with the engine libraries.
//!
//! Layouts mirror the engines' own headers; none of these types own the
//! memory they point at.

use std::os::raw::{c_char, c_ulong, c_void};

/// Longest counted string the Engine-A callin interface accepts.
pub const ASTR_CAPACITY: usize = 32767;

/// Engine-A counted string with inline storage.
#[repr(C)]
pub struct AStr {
    pub len: u16,
    pub str_: [c_char; ASTR_CAPACITY],
}

impl AStr {
    pub fn new() -> Self {
        Self {
            len: 0,
            str_: [0; ASTR_CAPACITY],
        }
    }

    /// Copy `bytes` in, truncating at capacity.
    pub fn set(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(ASTR_CAPACITY);
        for (dst, src) in self.str_[..n].iter_mut().zip(bytes) {
            *dst = *src as c_char;
        }
        self.len = n as u16;
    }

    /// View the counted contents as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        let n = (self.len as usize).min(ASTR_CAPACITY);
        // Safety: c_char and u8 have identical layout; n is within the
        // inline array.
        unsafe { std::slice::from_raw_parts(self.str_.as_ptr() as *const u8, n) }
    }
}

impl Default for AStr {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-A extended string cell. The engine allocates and owns the
/// pointed-at storage; cells must go back through the engine's kill
/// entry point once read.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExStr {
    pub len: u32,
    pub ptr: *mut c_char,
}

impl ExStr {
    pub fn empty() -> Self {
        Self {
            len: 0,
            ptr: std::ptr::null_mut(),
        }
    }

    /// View the engine-owned contents as bytes. Empty when the engine
    /// never filled the cell.
    pub fn as_bytes(&self) -> &[u8] {
        if self.ptr.is_null() {
            return &[];
        }
        // Safety: the engine guarantees `len` bytes behind `ptr` until
        // the cell is killed.
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len as usize) }
    }
}

/// Engine-B counted buffer descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct YdbBuffer {
    pub len_alloc: u32,
    pub len_used: u32,
    pub buf_addr: *mut c_char,
}

impl YdbBuffer {
    pub fn empty() -> Self {
        Self {
            len_alloc: 0,
            len_used: 0,
            buf_addr: std::ptr::null_mut(),
        }
    }

    /// Descriptor over read-only input bytes. The engine treats input
    /// buffers as const; the pointer cast is a C API formality.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            len_alloc: bytes.len() as u32,
            len_used: bytes.len() as u32,
            buf_addr: bytes.as_ptr() as *mut c_char,
        }
    }

    /// Descriptor the engine may write into.
    pub fn writable(region: &mut [u8]) -> Self {
        Self {
            len_alloc: region.len() as u32,
            len_used: 0,
            buf_addr: region.as_mut_ptr() as *mut c_char,
        }
    }
}

/// Engine-B string descriptor for the call-in interface.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct YdbString {
    pub length: c_ulong,
    pub address: *mut c_char,
}

/// Engine-B call-in routine descriptor with its resolution handle.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CiNameDescriptor {
    pub rtn_name: YdbString,
    pub handle: *mut c_void,
}
