use std::ptr::NonNull;

use crate::Pointer;

/// Abstraction for platform specific virtual memory handling.
/// [`crate::heap::SystemHeap`] needs one contiguous range of address space
/// that can be made usable a chunk at a time, but it doesn't care about the
/// APIs offered by the underlying kernel or libraries.
trait PlatformVirtualMemory {
    /// Reserves `length` bytes of contiguous address space without making
    /// them accessible yet. Returns the base of the reservation.
    unsafe fn reserve(length: usize) -> Pointer<u8>;

    /// Makes `length` bytes starting at `address` readable and writable.
    /// The range must fall inside a previous reservation and sit on page
    /// boundaries.
    unsafe fn commit(address: NonNull<u8>, length: usize) -> bool;

    /// Returns the whole reservation at `address` to the kernel.
    unsafe fn release(address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    unsafe fn page_size() -> usize;
}

/// Zero sized type that implements [`PlatformVirtualMemory`] for each OS.
pub(crate) struct Platform;

/// Virtual memory page size. 4096 bytes on most computers. This should be a
/// constant but we don't know the value at compile time.
pub(crate) static mut PAGE_SIZE: usize = 0;

/// We only know the value of the page size at runtime by calling into C
/// libraries, so we'll mutate a global variable once and reuse it afterwards.
#[inline]
pub(crate) fn page_size() -> usize {
    unsafe {
        if PAGE_SIZE == 0 {
            PAGE_SIZE = Platform::page_size();
        }

        PAGE_SIZE
    }
}

/// Convenience wrapper for [`PlatformVirtualMemory::reserve`].
#[inline]
pub(crate) unsafe fn reserve(length: usize) -> Pointer<u8> {
    Platform::reserve(length)
}

/// Convenience wrapper for [`PlatformVirtualMemory::commit`].
#[inline]
pub(crate) unsafe fn commit(address: NonNull<u8>, length: usize) -> bool {
    Platform::commit(address, length)
}

/// Convenience wrapper for [`PlatformVirtualMemory::release`].
#[inline]
pub(crate) unsafe fn release(address: NonNull<u8>, length: usize) {
    Platform::release(address, length)
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use libc;

    use super::{Platform, PlatformVirtualMemory};
    use crate::Pointer;

    impl PlatformVirtualMemory for Platform {
        unsafe fn reserve(length: usize) -> Pointer<u8> {
            // No access at all until pages are committed.
            let protection = libc::PROT_NONE;

            // The reservation is private to our process and not mapped to
            // any file. PROT_NONE pages cost address space, not memory.
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            // For all the configuration options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            match libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) {
                libc::MAP_FAILED => None,
                address => Some(NonNull::new_unchecked(address).cast()),
            }
        }

        unsafe fn commit(address: NonNull<u8>, length: usize) -> bool {
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            libc::mprotect(address.cast().as_ptr(), length, protection) == 0
        }

        unsafe fn release(address: NonNull<u8>, length: usize) {
            // The reservation simply stays mapped if this fails.
            libc::munmap(address.cast().as_ptr(), length);
        }

        unsafe fn page_size() -> usize {
            libc::sysconf(libc::_SC_PAGE_SIZE) as usize
        }
    }
}

#[cfg(windows)]
#[cfg(not(miri))]
mod windows {
    use std::{mem::MaybeUninit, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Platform, PlatformVirtualMemory};
    use crate::Pointer;

    impl PlatformVirtualMemory for Platform {
        unsafe fn reserve(length: usize) -> Pointer<u8> {
            // Unlike mmap, reserving and committing are separate steps here,
            // which is exactly the split we want. For details on each
            // parameter, see
            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualalloc#parameters
            let address =
                Memory::VirtualAlloc(None, length, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

            NonNull::new(address.cast())
        }

        unsafe fn commit(address: NonNull<u8>, length: usize) -> bool {
            let committed = Memory::VirtualAlloc(
                Some(address.cast().as_ptr() as *const _),
                length,
                Memory::MEM_COMMIT,
                Memory::PAGE_READWRITE,
            );

            !committed.is_null()
        }

        unsafe fn release(address: NonNull<u8>, _length: usize) {
            // Committed and reserved parts both go away with MEM_RELEASE and
            // length 0. See the docs for details:
            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualfree#parameters
            let address = address.cast().as_ptr();
            let length = 0;
            let flags = Memory::MEM_RELEASE;

            let _ = Memory::VirtualFree(address, length, flags);
        }

        unsafe fn page_size() -> usize {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}

#[cfg(miri)]
mod miri {
    //! When using Miri we can't rely on system calls such as `mmap`, so the
    //! global allocator stands in for the address space: reservations come
    //! back already usable and committing is a no-op. This also lets Miri
    //! catch leaks of the backing reservation itself.

    use std::{alloc, ptr::NonNull};

    use super::{page_size, Platform, PlatformVirtualMemory};
    use crate::Pointer;

    fn to_layout(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, page_size()).unwrap()
    }

    impl PlatformVirtualMemory for Platform {
        unsafe fn reserve(length: usize) -> Pointer<u8> {
            NonNull::new(alloc::alloc(to_layout(length)))
        }

        unsafe fn commit(_address: NonNull<u8>, _length: usize) -> bool {
            true
        }

        unsafe fn release(address: NonNull<u8>, length: usize) {
            alloc::dealloc(address.as_ptr(), to_layout(length));
        }

        unsafe fn page_size() -> usize {
            4096
        }
    }
}
