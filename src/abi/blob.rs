//! Owned byte buffers crossing the FFI boundary (§4.7).
//!
//! A [`Blob`] is always produced by this side (from a `Vec<u8>` via
//! [`Blob::from_vec`]) and must be released by [`blob_free`], never by the
//! caller's own allocator, since the `Vec`'s allocation came from Rust's.

use std::ptr;

/// `{ptr, len, cap}` view of a `Vec<u8>` handed across the boundary. `cap`
/// (absent from a typical `{ptr, len}` FFI blob) is kept so [`blob_free`]
/// can hand the bytes back to `Vec::from_raw_parts` exactly as allocated,
/// rather than assuming `len == cap` and risking a mismatched dealloc.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Blob {
    pub ptr: *mut u8,
    pub len: usize,
    pub cap: usize,
}

impl Blob {
    /// The empty blob, a valid, freeable no-op value.
    pub const fn empty() -> Self {
        Self { ptr: ptr::null_mut(), len: 0, cap: 0 }
    }

    /// Hand ownership of `bytes` to the caller as a `Blob`. The caller must
    /// eventually pass it to [`blob_free`] (directly, or by calling one of
    /// this module's `out_err`/`out_*` consumers).
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let mut bytes = std::mem::ManuallyDrop::new(bytes);
        Self { ptr: bytes.as_mut_ptr(), len: bytes.len(), cap: bytes.capacity() }
    }
}

/// Free a [`Blob`] previously produced by [`Blob::from_vec`]. Safe to call
/// on an already-freed (null) blob; not safe to call twice on the same
/// non-null blob, or on a blob this library did not allocate.
///
/// # Safety
/// `blob` must point to a valid, initialized `Blob`, and if its `ptr` is
/// non-null it must have come from `Blob::from_vec` and not have been freed
/// already.
#[no_mangle]
pub unsafe extern "C" fn fdb_blob_free(blob: *mut Blob) {
    if blob.is_null() {
        return;
    }
    // SAFETY: caller guarantees `blob` points to a valid `Blob`.
    let b = unsafe { &mut *blob };
    if !b.ptr.is_null() {
        // SAFETY: `b.ptr`/`b.len`/`b.cap` were produced together by
        // `Blob::from_vec` and not freed since, per this function's contract.
        drop(unsafe { Vec::from_raw_parts(b.ptr, b.len, b.cap) });
        b.ptr = ptr::null_mut();
        b.len = 0;
        b.cap = 0;
    }
}
