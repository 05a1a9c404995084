//! # rtnetlink Queries
//!
//! ## Purpose
//!
//! Link and address lookups plus the two changes the router makes when it hands an
//! interface back to the kernel: setting the link administratively up and
//! (re)assigning its address.
//!
//! ## How it works
//!
//! Requests are serialized with `netlink_packet_route` and sent over a fresh
//! `NETLINK_ROUTE` socket. Dumps are read until `NLMSG_DONE`; changes are sent with
//! `NLM_F_ACK` and read until the kernel's acknowledgement, whose error code is turned
//! into an `io::Error`.

use std::io;
use std::net::IpAddr;

use ipnet::IpNet;
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_REPLACE, NLM_F_REQUEST, NetlinkDeserializable,
    NetlinkMessage, NetlinkPayload, NetlinkSerializable,
};
use netlink_packet_route::{
    AddressFamily, RouteNetlinkMessage,
    address::{AddressAttribute, AddressMessage},
    link::{LinkAttribute, LinkFlags, LinkMessage},
};
use netlink_sys::{Socket, SocketAddr};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Link {
    pub if_index: u32,
    pub name: String,
    pub mtu: u32,
    pub mac: Option<[u8; 6]>,
    pub up: bool,
}

fn open_socket() -> io::Result<Socket> {
    let mut socket = Socket::new(netlink_sys::constants::NETLINK_ROUTE)?;
    socket.bind(&SocketAddr::new(0, 0))?;
    Ok(socket)
}

fn send<T>(socket: &Socket, mut req: NetlinkMessage<T>) -> io::Result<()>
where
    T: NetlinkSerializable,
{
    req.finalize();
    let mut send_buf = vec![0u8; req.buffer_len()];
    req.serialize(&mut send_buf);
    if socket.send(send_buf.as_slice(), 0)? != send_buf.len() {
        return Err(io::Error::other("Failed to send netlink request"));
    }
    Ok(())
}

/// Reads replies until `NLMSG_DONE` or an error/ack message, feeding each inner
/// message to `f`. Returns the error carried by the final message, if any.
fn read_replies<T, F>(socket: &Socket, mut f: F) -> io::Result<()>
where
    T: NetlinkDeserializable,
    F: FnMut(NetlinkMessage<T>) -> io::Result<()>,
{
    loop {
        let (recv_buf, _) = socket.recv_from_full()?;
        let mut buffer_view = &recv_buf[..];
        while !buffer_view.is_empty() {
            let msg = NetlinkMessage::<T>::deserialize(buffer_view).map_err(io::Error::other)?;
            let len = msg.header.length as usize;
            if len == 0 || len > buffer_view.len() {
                return Err(io::Error::other(
                    "Received a malformed netlink message (invalid length)",
                ));
            }
            match msg.payload {
                NetlinkPayload::Done(_) => return Ok(()),
                NetlinkPayload::Error(ref e) => {
                    return match e.code {
                        None => Ok(()),
                        Some(code) => Err(io::Error::from_raw_os_error(-code.get())),
                    };
                }
                _ => f(msg)?,
            }
            buffer_view = &buffer_view[len..];
        }
    }
}

/// Sends a dump request and collects whatever `f` extracts from the replies.
pub fn dump<T, F, R>(mut req: NetlinkMessage<T>, f: F) -> io::Result<Vec<R>>
where
    T: NetlinkSerializable + NetlinkDeserializable,
    F: Fn(NetlinkMessage<T>) -> io::Result<Option<R>>,
{
    let socket = open_socket()?;
    req.header.flags = NLM_F_REQUEST | NLM_F_DUMP;
    send(&socket, req)?;
    let mut result = Vec::new();
    read_replies(&socket, |msg| {
        if let Some(r) = f(msg)? {
            result.push(r);
        }
        Ok(())
    })?;
    Ok(result)
}

/// Sends a change request and waits for the kernel's acknowledgement.
pub fn request(message: RouteNetlinkMessage, flags: u16) -> io::Result<()> {
    let socket = open_socket()?;
    let mut req = NetlinkMessage::from(message);
    req.header.flags = NLM_F_REQUEST | NLM_F_ACK | flags;
    send(&socket, req)?;
    read_replies::<RouteNetlinkMessage, _>(&socket, |_| Ok(()))
}

pub fn get_links() -> io::Result<Vec<Link>> {
    let req = NetlinkMessage::from(RouteNetlinkMessage::GetLink(LinkMessage::default()));
    dump(req, |msg| match msg.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(ref link_msg)) => {
            let mut link = Link {
                if_index: link_msg.header.index,
                up: link_msg.header.flags.contains(LinkFlags::Up),
                ..Default::default()
            };
            for attr in link_msg.attributes.iter() {
                match attr {
                    LinkAttribute::IfName(name) => link.name = name.to_string(),
                    LinkAttribute::Mtu(mtu) => link.mtu = *mtu,
                    LinkAttribute::Address(mac) if mac.len() == 6 => {
                        link.mac = <[u8; 6]>::try_from(&mac[..6]).ok();
                    }
                    _ => {}
                }
            }
            Ok(Some(link))
        }
        _ => Ok(None),
    })
}

pub fn link_by_name(name: &str) -> io::Result<Option<Link>> {
    Ok(get_links()?.into_iter().find(|link| link.name == name))
}

/// Addresses assigned to `if_index`, in the order the kernel reports them.
pub fn get_addresses(if_index: u32) -> io::Result<Vec<IpNet>> {
    let req = NetlinkMessage::from(RouteNetlinkMessage::GetAddress(AddressMessage::default()));
    dump(req, |msg| match msg.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewAddress(ref addr_msg)) => {
            if addr_msg.header.index != if_index {
                return Ok(None);
            }
            for attr in addr_msg.attributes.iter() {
                if let AddressAttribute::Address(ip) = attr {
                    return Ok(IpNet::new(*ip, addr_msg.header.prefix_len).ok());
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    })
}

/// Sets the link administratively up.
pub fn set_link_up(if_index: u32) -> io::Result<()> {
    let mut msg = LinkMessage::default();
    msg.header.index = if_index;
    msg.header.flags = LinkFlags::Up;
    msg.header.change_mask = LinkFlags::Up;
    request(RouteNetlinkMessage::SetLink(msg), 0)
}

/// Assigns `net` to `if_index`, replacing an existing assignment of the same address.
pub fn replace_address(if_index: u32, net: IpNet) -> io::Result<()> {
    let mut msg = AddressMessage::default();
    msg.header.index = if_index;
    msg.header.prefix_len = net.prefix_len();
    msg.header.family = match net.addr() {
        IpAddr::V4(_) => AddressFamily::Inet,
        IpAddr::V6(_) => AddressFamily::Inet6,
    };
    if net.addr().is_ipv4() {
        msg.attributes.push(AddressAttribute::Local(net.addr()));
    }
    msg.attributes.push(AddressAttribute::Address(net.addr()));
    request(
        RouteNetlinkMessage::NewAddress(msg),
        NLM_F_CREATE | NLM_F_REPLACE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "needs a kernel with rtnetlink"]
    fn loopback_is_listed() {
        let lo = link_by_name("lo").unwrap().unwrap();
        assert!(lo.if_index > 0);
        let addrs = get_addresses(lo.if_index).unwrap();
        assert!(addrs.iter().any(|net| net.addr().is_loopback()));
    }
}
