//! `AF_PACKET` socket for injecting and capturing whole Ethernet frames on one
//! interface.

use std::ffi::CString;
use std::io::{Error, ErrorKind, Result};
use std::mem::size_of;
use std::os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd};
use std::time::{Duration, Instant};

pub struct RawSocket {
    fd: OwnedFd,
    if_index: u32,
}

impl RawSocket {
    /// Opens a socket receiving every protocol on `dev`.
    pub fn open(dev: &str) -> Result<Self> {
        let name = CString::new(dev).map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;
        let if_index = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if if_index == 0 {
            return Err(Error::last_os_error());
        }
        let protocol = (libc::ETH_P_ALL as u16).to_be();
        let fd = unsafe {
            let fd = libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                protocol as libc::c_int,
            );
            if fd < 0 {
                return Err(Error::last_os_error());
            }
            OwnedFd::from_raw_fd(fd)
        };
        let addr = link_addr(if_index, protocol);
        if unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        } < 0
        {
            return Err(Error::last_os_error());
        }
        Ok(RawSocket { fd, if_index })
    }

    pub fn send(&self, frame: &[u8]) -> Result<()> {
        let addr = link_addr(self.if_index, 0);
        let sent = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    /// Waits up to `timeout` for a frame accepted by `filter`; others are skipped.
    pub fn recv_matching<F>(&self, timeout: Duration, filter: F) -> Result<Vec<u8>>
    where
        F: Fn(&[u8]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; 2048];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(Error::new(ErrorKind::TimedOut, "no matching frame"));
            }
            let mut fds = [libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            }];
            let ready = unsafe { libc::poll(fds.as_mut_ptr(), 1, left.as_millis() as libc::c_int) };
            if ready < 0 {
                return Err(Error::last_os_error());
            }
            if ready == 0 {
                continue;
            }
            let len = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if len < 0 {
                return Err(Error::last_os_error());
            }
            let frame = &buf[..len as usize];
            if filter(frame) {
                return Ok(frame.to_vec());
            }
        }
    }
}

fn link_addr(if_index: u32, protocol: u16) -> libc::sockaddr_ll {
    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = protocol;
    addr.sll_ifindex = if_index as libc::c_int;
    addr
}
