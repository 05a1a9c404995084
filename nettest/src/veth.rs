use std::io::{Error, ErrorKind, Result};

use eui48::MacAddress;

use crate::command::execute_command;

pub fn setup_pair(dev_prefix: &str, ip_prefix: &str) -> Result<()> {
    log::info!("creating new veth pair {dev_prefix}0 + {dev_prefix}1");
    execute_command(&format!("ip link add {dev_prefix}0 type veth peer {dev_prefix}1"))?;
    up_pair(dev_prefix, ip_prefix)
}

pub fn teardown_pair(dev_prefix: &str) -> Result<()> {
    log::info!("tearing down veth pair {dev_prefix}0");
    execute_command(&format!("ip link del {dev_prefix}0"))
}

/// `NotFound` when `{prefix}0` does not exist.
pub fn check_pair(dev_prefix: &str) -> Result<()> {
    let output = std::process::Command::new("ip")
        .args(["link", "show", &format!("{dev_prefix}0")])
        .output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::NotFound,
            format!("Pair {dev_prefix}0 does not exist"),
        ))
    }
}

pub fn up_if_dev(dev: &str) -> Result<()> {
    execute_command(&format!("ip link set {dev} up"))
}

pub fn up_pair(dev_prefix: &str, ip_prefix: &str) -> Result<()> {
    for (i, host) in [(0, 100), (1, 101)] {
        let dev = format!("{dev_prefix}{i}");
        set_ipv4_addr(&dev, &format!("{ip_prefix}{host}/24"))?;
        up_if_dev(&dev)?;
    }
    Ok(())
}

pub fn set_ipv4_addr(dev: &str, addr: &str) -> Result<()> {
    log::info!("setting IPv4 address {addr} on {dev}");
    execute_command(&format!("ip addr replace {addr} dev {dev}"))
}

/// Hardware address of `dev` as reported by sysfs.
pub fn mac_of(dev: &str) -> Result<[u8; 6]> {
    let text = std::fs::read_to_string(format!("/sys/class/net/{dev}/address"))?;
    parse_mac(&text)
}

fn parse_mac(text: &str) -> Result<[u8; 6]> {
    MacAddress::parse_str(text.trim())
        .map(|mac| mac.to_array())
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("invalid MAC address: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysfs_address_text_is_parsed() {
        assert_eq!(
            parse_mac("aa:bb:cc:dd:ee:0f\n").unwrap(),
            [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0f]
        );
    }

    #[test]
    fn garbage_is_invalid_data() {
        let err = parse_mac("aa:bb:cc\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
