//! # XSK Redirect Program
//!
//! ## Purpose
//!
//! An AF_XDP socket only sees frames that an XDP program redirects into it. This module
//! loads a minimal redirect program together with its `XSKMAP`, attaches it to the
//! interface and detaches it again when the owner is dropped.
//!
//! ## How it works
//!
//! The program is five instructions long and does not need a compiler:
//!
//! ```text
//! r2 = *(u32 *)(r1 + 16)        ; ctx->rx_queue_index
//! r1 = map_fd(xsks)             ; 16-byte ld_imm64 with BPF_PSEUDO_MAP_FD
//! r3 = XDP_PASS                 ; fallback action when the slot is empty
//! call bpf_redirect_map
//! exit
//! ```
//!
//! It is loaded with `bpf_prog_load`, the socket is stored in the map under its queue
//! id, and the program is attached with `bpf_xdp_attach`. Frames arriving on queues
//! without a socket fall through to the kernel stack. A driver without native XDP
//! refuses driver mode; the program is then attached in generic (SKB) mode.

use std::ffi::CString;
use std::io;
use std::mem::size_of;
use std::ptr;

const BPF_LD_IMM64: u8 = 0x18;
const BPF_LDX_MEM_W: u8 = 0x61;
const BPF_MOV64_IMM: u8 = 0xb7;
const BPF_CALL: u8 = 0x85;
const BPF_EXIT: u8 = 0x95;
const BPF_PSEUDO_MAP_FD: u8 = 1;
const BPF_FUNC_REDIRECT_MAP: i32 = 51;
const XDP_PASS: i32 = 2;
const XDP_MD_RX_QUEUE_INDEX: i16 = 16;

/// Encodes one `struct bpf_insn` as it is laid out in memory on little-endian hosts.
const fn insn(code: u8, dst: u8, src: u8, off: i16, imm: i32) -> u64 {
    code as u64
        | (((src << 4) | (dst & 0x0f)) as u64) << 8
        | (off as u16 as u64) << 16
        | (imm as u32 as u64) << 32
}

fn redirect_program(map_fd: i32) -> [u64; 6] {
    [
        insn(BPF_LDX_MEM_W, 2, 1, XDP_MD_RX_QUEUE_INDEX, 0),
        insn(BPF_LD_IMM64, 1, BPF_PSEUDO_MAP_FD, 0, map_fd),
        insn(0, 0, 0, 0, 0),
        insn(BPF_MOV64_IMM, 3, 0, 0, XDP_PASS),
        insn(BPF_CALL, 0, 0, 0, BPF_FUNC_REDIRECT_MAP),
        insn(BPF_EXIT, 0, 0, 0, 0),
    ]
}

/// Attach mode of the redirect program.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AttachMode {
    /// Native driver mode; required for zero-copy.
    #[default]
    Driver,
    /// Generic (SKB) mode, works on every interface.
    Generic,
}

impl AttachMode {
    fn flags(self) -> u32 {
        match self {
            AttachMode::Driver => libbpf_sys::XDP_FLAGS_DRV_MODE,
            AttachMode::Generic => libbpf_sys::XDP_FLAGS_SKB_MODE,
        }
    }

    /// Mode to retry with when the driver refuses this one.
    fn fallback(self) -> Option<AttachMode> {
        match self {
            AttachMode::Driver => Some(AttachMode::Generic),
            AttachMode::Generic => None,
        }
    }
}

/// A redirect program attached to an interface, detached on drop.
pub struct XskRedirect {
    if_index: u32,
    mode: AttachMode,
    map_fd: libc::c_int,
    prog_fd: libc::c_int,
}

impl XskRedirect {
    /// Loads the redirect program and attaches it to `if_index`.
    pub fn attach(if_index: u32, mode: AttachMode) -> io::Result<Self> {
        let map_name = CString::new("xsks")?;
        let map_fd = unsafe {
            libbpf_sys::bpf_map_create(
                libbpf_sys::BPF_MAP_TYPE_XSKMAP,
                map_name.as_ptr(),
                size_of::<u32>() as u32,
                size_of::<u32>() as u32,
                64,
                ptr::null(),
            )
        };
        if map_fd < 0 {
            return Err(io::Error::other(format!(
                "Failed to create XSKMAP: {}",
                io::Error::from_raw_os_error(-map_fd)
            )));
        }

        // From here on `Drop` releases whatever has been set up.
        let mut owned = XskRedirect {
            if_index,
            mode,
            map_fd,
            prog_fd: -1,
        };

        let code = redirect_program(map_fd);
        let prog_name = CString::new("xsk_redirect")?;
        let license = CString::new("GPL")?;
        owned.prog_fd = unsafe {
            libbpf_sys::bpf_prog_load(
                libbpf_sys::BPF_PROG_TYPE_XDP,
                prog_name.as_ptr(),
                license.as_ptr(),
                code.as_ptr() as *const libbpf_sys::bpf_insn,
                code.len() as _,
                ptr::null_mut(),
            )
        };
        if owned.prog_fd < 0 {
            return Err(io::Error::other(format!(
                "Failed to load XSK redirect program: {}",
                io::Error::from_raw_os_error(-owned.prog_fd)
            )));
        }

        let mut rc = attach_prog(if_index, owned.prog_fd, mode);
        if rc < 0 {
            if let Some(fallback) = mode.fallback() {
                log::warn!(
                    "interface {if_index} refused {mode:?} mode ({}), retrying in {fallback:?} mode",
                    io::Error::from_raw_os_error(-rc)
                );
                owned.mode = fallback;
                rc = attach_prog(if_index, owned.prog_fd, fallback);
            }
        }
        let mode = owned.mode;
        if rc < 0 {
            let prog_fd = std::mem::replace(&mut owned.prog_fd, -1);
            unsafe { libc::close(prog_fd) };
            return Err(io::Error::other(format!(
                "Failed to attach XDP program to interface {if_index} in {mode:?} mode: {}",
                io::Error::from_raw_os_error(-rc)
            )));
        }
        log::info!("XSK redirect program attached to interface {if_index} ({mode:?} mode)");
        Ok(owned)
    }

    /// Mode the program ended up attached in.
    pub fn mode(&self) -> AttachMode {
        self.mode
    }

    /// Directs frames received on `queue_id` into the socket `xsk_fd`.
    pub fn register(&self, queue_id: u32, xsk_fd: libc::c_int) -> io::Result<()> {
        let rc = unsafe {
            libbpf_sys::bpf_map_update_elem(
                self.map_fd,
                &queue_id as *const u32 as *const libc::c_void,
                &xsk_fd as *const libc::c_int as *const libc::c_void,
                0,
            )
        };
        if rc < 0 {
            return Err(io::Error::other(format!(
                "Failed to register socket for queue {queue_id}: {}",
                io::Error::from_raw_os_error(-rc)
            )));
        }
        Ok(())
    }
}

fn attach_prog(if_index: u32, prog_fd: libc::c_int, mode: AttachMode) -> libc::c_int {
    unsafe {
        libbpf_sys::bpf_xdp_attach(if_index as libc::c_int, prog_fd, mode.flags(), ptr::null())
    }
}

impl Drop for XskRedirect {
    fn drop(&mut self) {
        unsafe {
            if self.prog_fd >= 0 {
                let rc = libbpf_sys::bpf_xdp_detach(
                    self.if_index as libc::c_int,
                    self.mode.flags(),
                    ptr::null(),
                );
                if rc < 0 {
                    log::error!(
                        "Failed to detach XDP program from interface {}: {}",
                        self.if_index,
                        io::Error::from_raw_os_error(-rc)
                    );
                }
                libc::close(self.prog_fd);
            }
            if self.map_fd >= 0 {
                libc::close(self.map_fd);
            }
        }
    }
}

/// Queries the XDP feature flags (`NETDEV_XDP_ACT_*`) of the driver behind `if_index`.
pub fn xdp_features(if_index: u32) -> io::Result<u32> {
    let mut opts: libbpf_sys::bpf_xdp_query_opts = unsafe { std::mem::zeroed() };
    opts.sz = size_of::<libbpf_sys::bpf_xdp_query_opts>() as _;
    let rc = unsafe {
        libbpf_sys::bpf_xdp_query(
            if_index as libc::c_int,
            libbpf_sys::XDP_FLAGS_DRV_MODE as libc::c_int,
            &mut opts,
        )
    };
    if rc < 0 {
        return Err(io::Error::other(format!(
            "Failed to query XDP features: {}",
            io::Error::from_raw_os_error(-rc)
        )));
    }
    Ok(opts.feature_flags as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_encoding() {
        // r2 = *(u32 *)(r1 + 16)
        assert_eq!(insn(BPF_LDX_MEM_W, 2, 1, 16, 0), 0x0000_0000_0010_1261);
        // call 51
        assert_eq!(insn(BPF_CALL, 0, 0, 0, 51), 0x0000_0033_0000_0085);
        // r3 = 2
        assert_eq!(insn(BPF_MOV64_IMM, 3, 0, 0, 2), 0x0000_0002_0000_03b7);
    }

    #[test]
    fn driver_mode_falls_back_to_generic() {
        assert_eq!(AttachMode::Driver.fallback(), Some(AttachMode::Generic));
        assert_eq!(AttachMode::Generic.fallback(), None);
        assert_eq!(AttachMode::Generic.flags(), libbpf_sys::XDP_FLAGS_SKB_MODE);
    }

    #[test]
    fn map_fd_lands_in_ld_imm64() {
        let code = redirect_program(7);
        assert_eq!(code[1] & 0xff, BPF_LD_IMM64 as u64);
        assert_eq!((code[1] >> 8) & 0xff, 0x11);
        assert_eq!(code[1] >> 32, 7);
        assert_eq!(code[2], 0);
    }
}
