//! User-memory copy boundary.
//!
//! Callers hand over a kernel-side buffer plus an address that is either a
//! user-space virtual address (`to_user == true`) or another kernel
//! pointer, and the embedder decides how to actually move the bytes
//! (walking the page table, a plain `memcpy`, or rejecting the request as
//! a page fault).

/// Raised when a copy into or out of user memory cannot be completed
/// (unmapped page, access violation, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyFault;

pub trait UserCopy {
    /// `write == true` copies `buf` out to `addr`; `write == false` copies
    /// `addr` in to `buf`. `to_user` distinguishes a true user-space address
    /// from a second kernel pointer, mirroring the `user_flag` of the
    /// original `copy(user_flag, user_addr, kernel_ptr, n, direction)`
    /// primitive.
    fn copy(&self, to_user: bool, addr: usize, buf: &mut [u8], write: bool) -> Result<(), CopyFault>;
}

/// Stand-in for kernel-internal callers and host-side tests: every `addr` is
/// treated as a plain kernel pointer, `to_user` is rejected since there is no
/// address space to cross into.
pub struct KernelOnlyCopy;

impl UserCopy for KernelOnlyCopy {
    fn copy(&self, to_user: bool, addr: usize, buf: &mut [u8], write: bool) -> Result<(), CopyFault> {
        if to_user {
            return Err(CopyFault);
        }
        // SAFETY: callers of `UserCopy::copy` with `to_user == false` promise
        // `addr` is a valid kernel pointer to `buf.len()` bytes. This is the
        // narrow FFI boundary this trait exists to abstract over.
        let kernel = unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, buf.len()) };
        if write {
            kernel.copy_from_slice(buf);
        } else {
            buf.copy_from_slice(kernel);
        }
        Ok(())
    }
}
