//! # Memory-Mapped Regions
//!
//! Owns the anonymous mapping backing the UMEM and the shared mappings of the AF_XDP
//! rings. Every region is unmapped when its owner is dropped. The UMEM prefers 2 MiB
//! huge pages when the system has free ones, which keeps the frame pool inside a
//! handful of TLB entries.

use std::fs::File;
use std::io::{BufRead as _, BufReader};
use std::{io, ptr};

const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// An owned `mmap` region, unmapped on drop.
pub struct MappedRegion {
    addr: *mut libc::c_void,
    len: usize,
}

// The region is exclusively owned; raw pointers are only dereferenced by the
// thread that currently owns the engine.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Maps `size` bytes of anonymous private memory.
    ///
    /// `huge_page = None` uses huge pages only when `/proc/meminfo` reports free
    /// 2 MiB pages.
    pub fn anonymous(size: usize, huge_page: Option<bool>) -> io::Result<Self> {
        let huge = match huge_page {
            Some(yes) => yes,
            None => free_huge_pages().unwrap_or(false),
        };
        let page = if huge {
            HUGE_PAGE_SIZE
        } else {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        };
        let len = size.div_ceil(page) * page;
        let flags = libc::MAP_PRIVATE
            | libc::MAP_ANONYMOUS
            | if huge {
                libc::MAP_HUGETLB | libc::MAP_HUGE_2MB
            } else {
                0
            };
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        log::debug!("mapped {len} bytes of UMEM (huge pages: {huge})");
        Ok(MappedRegion { addr, len })
    }

    /// Maps `len` bytes of the socket `fd` at page offset `offset`.
    pub fn shared(fd: libc::c_int, len: usize, offset: libc::off_t) -> io::Result<Self> {
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(MappedRegion { addr, len })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.addr as *mut u8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if !self.addr.is_null() && unsafe { libc::munmap(self.addr, self.len) } < 0 {
            log::error!("Failed to unmap memory: {}", io::Error::last_os_error());
        }
    }
}

/// Returns `true` when 2 MiB huge pages are configured and at least one is free.
fn free_huge_pages() -> io::Result<bool> {
    let reader = BufReader::new(File::open("/proc/meminfo")?);
    let mut size_kb = None;
    let mut free = None;
    for line in reader.lines() {
        let line = line?;
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_end_matches(" kB");
        match key.trim() {
            "Hugepagesize" => size_kb = value.parse::<u64>().ok(),
            "HugePages_Free" => free = value.parse::<u64>().ok(),
            _ => {}
        }
    }
    Ok(matches!((size_kb, free), (Some(2048), Some(n)) if n > 0))
}
