//! Owned byte buffer moved between flowgraph stages.
//!
//! Stages exchange exactly one buffer per edge and per frame; the
//! scheduler hands ownership across stage boundaries instead of
//! sharing. Storage is 32-byte aligned so the same allocation can
//! back byte, f32 and complex sample views.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use num_complex::Complex32;

const ALIGN: usize = 32;

/// Contiguous, resizable, 32-byte-aligned byte region.
pub struct Buffer {
    ptr: Option<NonNull<u8>>,
    cap: usize,
    len: usize,
}

// The buffer exclusively owns its allocation.
unsafe impl Send for Buffer {}

impl Buffer {
    pub fn new() -> Self {
        Buffer { ptr: None, cap: 0, len: 0 }
    }

    /// A zero-filled buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        let mut b = Buffer::new();
        b.set_len(len);
        b
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let mut b = Buffer::with_len(data.len());
        b.as_bytes_mut().copy_from_slice(data);
        b
    }

    pub fn from_complex(data: &[Complex32]) -> Self {
        let mut b = Buffer::with_len(data.len() * std::mem::size_of::<Complex32>());
        b.as_complex_mut().copy_from_slice(data);
        b
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resize to `len` bytes, preserving the common prefix. Newly
    /// exposed bytes are zero.
    pub fn set_len(&mut self, len: usize) {
        if len > self.cap {
            self.grow(len);
        }
        if len > self.len {
            // grow() zeroes fresh allocations; zero the gap when
            // shrinking then re-growing within the same allocation.
            let bytes = unsafe {
                std::slice::from_raw_parts_mut(self.ptr.unwrap().as_ptr(), len)
            };
            for b in &mut bytes[self.len..len] {
                *b = 0;
            }
        }
        self.len = len;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn set_bytes(&mut self, data: &[u8]) {
        self.set_len(data.len());
        self.as_bytes_mut().copy_from_slice(data);
    }

    pub fn append_bytes(&mut self, data: &[u8]) {
        let old = self.len;
        self.set_len(old + data.len());
        self.as_bytes_mut()[old..].copy_from_slice(data);
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self.ptr {
            Some(p) => unsafe { std::slice::from_raw_parts(p.as_ptr(), self.len) },
            None => &[],
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self.ptr {
            Some(p) => unsafe { std::slice::from_raw_parts_mut(p.as_ptr(), self.len) },
            None => &mut [],
        }
    }

    /// View the contents as f32 samples. The length must be a
    /// multiple of four bytes.
    pub fn as_f32(&self) -> &[f32] {
        let bytes = self.as_bytes();
        debug_assert_eq!(bytes.len() % 4, 0);
        unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const f32, bytes.len() / 4) }
    }

    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        let bytes = self.as_bytes_mut();
        debug_assert_eq!(bytes.len() % 4, 0);
        unsafe {
            std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut f32, bytes.len() / 4)
        }
    }

    /// View the contents as complex samples. The length must be a
    /// multiple of eight bytes.
    pub fn as_complex(&self) -> &[Complex32] {
        let bytes = self.as_bytes();
        debug_assert_eq!(bytes.len() % 8, 0);
        unsafe {
            std::slice::from_raw_parts(bytes.as_ptr() as *const Complex32, bytes.len() / 8)
        }
    }

    pub fn as_complex_mut(&mut self) -> &mut [Complex32] {
        let bytes = self.as_bytes_mut();
        debug_assert_eq!(bytes.len() % 8, 0);
        unsafe {
            std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut Complex32, bytes.len() / 8)
        }
    }

    pub fn num_complex(&self) -> usize {
        self.len / std::mem::size_of::<Complex32>()
    }

    /// Resize to hold `n` complex samples, zero-filled when growing.
    pub fn set_complex_len(&mut self, n: usize) {
        self.set_len(n * std::mem::size_of::<Complex32>());
    }

    fn grow(&mut self, min_cap: usize) {
        let new_cap = min_cap.next_power_of_two().max(ALIGN);
        let layout = Layout::from_size_align(new_cap, ALIGN).expect("buffer layout");
        let new_ptr = unsafe { alloc_zeroed(layout) };
        let new_ptr = NonNull::new(new_ptr).expect("buffer allocation failed");
        if let Some(old) = self.ptr {
            unsafe {
                std::ptr::copy_nonoverlapping(old.as_ptr(), new_ptr.as_ptr(), self.len);
                dealloc(old.as_ptr(), Layout::from_size_align(self.cap, ALIGN).unwrap());
            }
        }
        self.ptr = Some(new_ptr);
        self.cap = new_cap;
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(p) = self.ptr {
            unsafe {
                dealloc(p.as_ptr(), Layout::from_size_align(self.cap, ALIGN).unwrap());
            }
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        Buffer::from_bytes(self.as_bytes())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("cap", &self.cap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        let b = Buffer::with_len(100);
        assert_eq!(b.as_bytes().as_ptr() as usize % ALIGN, 0);
    }

    #[test]
    fn test_resize_preserves_prefix_and_zeroes_tail() {
        let mut b = Buffer::from_bytes(&[1, 2, 3, 4]);
        b.set_len(8);
        assert_eq!(b.as_bytes(), &[1, 2, 3, 4, 0, 0, 0, 0]);
        b.set_len(2);
        assert_eq!(b.as_bytes(), &[1, 2]);
        b.set_len(4);
        assert_eq!(b.as_bytes(), &[1, 2, 0, 0]);
    }

    #[test]
    fn test_complex_view_roundtrip() {
        let samples = [Complex32::new(1.0, -1.0), Complex32::new(0.5, 0.25)];
        let b = Buffer::from_complex(&samples);
        assert_eq!(b.num_complex(), 2);
        assert_eq!(b.as_complex(), &samples);
    }

    #[test]
    fn test_append() {
        let mut b = Buffer::from_bytes(&[1, 2]);
        b.append_bytes(&[3, 4]);
        assert_eq!(b.as_bytes(), &[1, 2, 3, 4]);
    }
}
