/*! The link codec: parse and compose `RTM_*LINK` messages.

A link is one network-interface object in the kernel's routing subsystem.
The kernel describes it with an `RTM_NEWLINK` message: a fixed
`struct ifinfomsg` (family, ARP hardware type, interface index, flags)
followed by the attribute list.  Requests travel the other way with the
same layout.

The codec is strictly typed against the link schema.  Parsing dispatches
each attribute id to a dedicated extractor and ignores ids it does not
know, so newer kernels with richer attribute sets stay readable.
Composition stamps a fresh header into a caller-owned [`MsgBuf`] and then
appends attributes one setter at a time, each checking the buffer ceiling.
*/

use crate::attr::AttrIter;
use crate::error::{Error, Result};
use crate::msg::{Msg, MsgBuf, NLM_F_ACK, NLM_F_DUMP, NLM_F_DUMP_INTR, NLM_F_REQUEST};
use crate::sock::Sock;
use byteorder::{ByteOrder, NativeEndian};

/// rtnetlink message types for the link object, from linux/rtnetlink.h.
pub const RTM_NEWLINK: u16 = 16;
pub const RTM_DELLINK: u16 = 17;
pub const RTM_GETLINK: u16 = 18;

/// Size of `struct ifinfomsg`.
pub const IFINFO_LEN: usize = 16;

// Link attribute ids, from linux/if_link.h.
const IFLA_ADDRESS: u16 = 1;
const IFLA_BROADCAST: u16 = 2;
const IFLA_IFNAME: u16 = 3;
const IFLA_MTU: u16 = 4;
const IFLA_LINK: u16 = 5;
const IFLA_MASTER: u16 = 10;
const IFLA_OPERSTATE: u16 = 16;
const IFLA_GROUP: u16 = 27;
const IFLA_PROMISCUITY: u16 = 30;
const IFLA_CARRIER: u16 = 33;

/// Interface names are at most 15 bytes plus the wire terminator.
pub const IFNAMSIZ: usize = 16;

/// The largest IPv4 packet; MTUs requested from userspace stay within it.
pub const IP_MAXPACKET: u32 = 65535;

/// ARP hardware type sentinels that never describe a real device.
pub const ARPHRD_VOID: u16 = 0xFFFF;
pub const ARPHRD_NONE: u16 = 0xFFFE;

/// RFC 2863 operational state of a link, from linux/if.h.
///
/// The kernel reports `NotPresent` and `Testing` for devices mid-teardown
/// or under self-test; neither ever appears in a parsed record, and
/// userspace may only request the `Up` and `Down` transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperState {
    Unknown = 0,
    NotPresent = 1,
    Down = 2,
    LowerLayerDown = 3,
    Testing = 4,
    Dormant = 5,
    Up = 6,
}

impl OperState {
    fn from_wire(value: u8) -> Result<OperState> {
        match value {
            0 => Ok(OperState::Unknown),
            2 => Ok(OperState::Down),
            3 => Ok(OperState::LowerLayerDown),
            5 => Ok(OperState::Dormant),
            6 => Ok(OperState::Up),
            _ => Err(Error::Malformed),
        }
    }
}

/// One network interface, as described by an `RTM_NEWLINK` message.
///
/// The name and the hardware addresses borrow from the datagram buffer
/// the record was parsed out of; copy them out if they must outlive it.
/// Fields of index kind use 0 for "not reported".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link<'a> {
    /// ARP hardware type; never one of the reserved sentinels.
    pub iftype: u16,
    /// Kernel-assigned interface index, always positive.
    pub index: i32,
    /// Unicast hardware address, when the device has one.
    pub ucast_hwaddr: Option<&'a [u8; 6]>,
    /// Broadcast hardware address, when the device has one.
    pub bcast_hwaddr: Option<&'a [u8; 6]>,
    /// Interface name, without the wire terminator.  Always shorter than
    /// [`IFNAMSIZ`].
    pub name: &'a str,
    /// Maximum transmission unit; 0 when the kernel did not report one.
    pub mtu: u32,
    /// Index of the underlying device, for virtual links stacked on a
    /// real one.
    pub link: u32,
    /// Index of the master (bridge, bond) this device is enslaved to.
    pub master: u32,
    /// Operational state.
    pub oper_state: OperState,
    /// Interface group id.
    pub group: u32,
    /// Promiscuous-mode reference count.
    pub promisc: u32,
    /// Carrier state; shares the operational-state wire encoding.
    pub carrier: OperState,
}

/// True when a link message carries no attributes at all.
pub fn link_msg_is_empty(msg: &Msg<'_>) -> bool {
    msg.payload().len() <= IFINFO_LEN
}

/// Parse an `RTM_NEWLINK` message into a [`Link`] record.
///
/// Hand over only messages the walker classified as payload: the type,
/// flags and length of `msg` are preconditions here, not runtime errors.
/// A message that walks to completion without a name attribute names no
/// device and fails with [`Error::NoDevice`].
pub fn parse_link<'a>(msg: &Msg<'a>) -> Result<Link<'a>> {
    debug_assert_eq!(msg.msg_type(), RTM_NEWLINK);
    debug_assert_eq!(msg.flags() & NLM_F_DUMP_INTR, 0);
    debug_assert!(msg.payload().len() >= IFINFO_LEN);

    let payload = msg.payload();
    let iftype = NativeEndian::read_u16(&payload[2..4]);
    let index = NativeEndian::read_i32(&payload[4..8]);
    if iftype == ARPHRD_VOID || iftype == ARPHRD_NONE {
        return Err(Error::Malformed);
    }
    if index <= 0 {
        return Err(Error::Malformed);
    }

    let mut ucast_hwaddr = None;
    let mut bcast_hwaddr = None;
    let mut name = None;
    let mut mtu = 0;
    let mut link = 0;
    let mut master = 0;
    let mut oper_state = OperState::Unknown;
    let mut group = 0;
    let mut promisc = 0;
    let mut carrier = OperState::Unknown;
    for attr in AttrIter::new(&payload[IFINFO_LEN..]) {
        match attr.id() {
            IFLA_ADDRESS => ucast_hwaddr = Some(attr.parse_hwaddr()?),
            IFLA_BROADCAST => bcast_hwaddr = Some(attr.parse_hwaddr()?),
            IFLA_IFNAME => {
                let parsed = attr.parse_str(IFNAMSIZ)?;
                if parsed.is_empty() {
                    return Err(Error::Malformed);
                }
                name = Some(parsed);
            }
            IFLA_MTU => {
                let value = attr.parse_u32()?;
                if value == 0 {
                    return Err(Error::OutOfRange);
                }
                mtu = value;
            }
            IFLA_LINK => {
                let value = attr.parse_u32()?;
                if value == 0 {
                    return Err(Error::OutOfRange);
                }
                link = value;
            }
            IFLA_MASTER => {
                let value = attr.parse_u32()?;
                if value == 0 {
                    return Err(Error::OutOfRange);
                }
                master = value;
            }
            IFLA_OPERSTATE => oper_state = OperState::from_wire(attr.parse_u8()?)?,
            IFLA_GROUP => group = attr.parse_u32()?,
            IFLA_PROMISCUITY => promisc = attr.parse_u32()?,
            IFLA_CARRIER => carrier = OperState::from_wire(attr.parse_u8()?)?,
            // Newer kernels report plenty of ids we don't know; skip them.
            _ => {}
        }
    }

    let name = name.ok_or(Error::NoDevice)?;
    Ok(Link {
        iftype,
        index,
        ucast_hwaddr,
        bcast_hwaddr,
        name,
        mtu,
        link,
        master,
        oper_state,
        group,
        promisc,
        carrier,
    })
}

/// Compose a fresh `RTM_NEWLINK` request into `buf`.
///
/// The header asks for an acknowledgement and is stamped with the next
/// sequence number of `sock`.  `iftype` must name a real hardware type
/// and `index` an existing device; the flags and change mask of the info
/// header stay zero.
pub fn compose_new_link(buf: &mut MsgBuf, sock: &mut Sock, iftype: u16, index: i32) {
    debug_assert_ne!(iftype, ARPHRD_VOID);
    debug_assert_ne!(iftype, ARPHRD_NONE);
    debug_assert!(index > 0);

    let seqno = sock.next_seqno();
    buf.put_header(RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK, seqno, sock.port_id());
    let info = buf.put_extra_header(IFINFO_LEN);
    // ifi_family stays AF_UNSPEC.
    NativeEndian::write_u16(&mut info[2..4], iftype);
    NativeEndian::write_i32(&mut info[4..8], index);
}

/// Compose an `RTM_GETLINK` dump request enumerating every link.
pub fn compose_dump_links(buf: &mut MsgBuf, sock: &mut Sock) {
    let seqno = sock.next_seqno();
    buf.put_header(RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP, seqno, sock.port_id());
    buf.put_extra_header(IFINFO_LEN);
}

/// Append the unicast hardware address attribute.
///
/// Only locally administered unicast addresses may be assigned from
/// userspace.
pub fn put_ucast_hwaddr(buf: &mut MsgBuf, addr: &[u8; 6]) -> Result<()> {
    debug_assert!(hwaddr_is_laa(addr));
    debug_assert!(hwaddr_is_ucast(addr));

    buf.put_attr(IFLA_ADDRESS, addr)
}

/// Append the interface name attribute.
///
/// `name` must be non-empty, shorter than [`IFNAMSIZ`] and free of NUL
/// bytes; the wire attribute carries the terminator.
pub fn put_name(buf: &mut MsgBuf, name: &str) -> Result<()> {
    debug_assert!(!name.is_empty());
    debug_assert!(name.len() < IFNAMSIZ);
    debug_assert!(!name.as_bytes().contains(&0));

    let mut wire = [0; IFNAMSIZ];
    wire[..name.len()].copy_from_slice(name.as_bytes());
    buf.put_attr(IFLA_IFNAME, &wire[..name.len() + 1])
}

/// Append the MTU attribute.  `mtu` must be positive and within
/// [`IP_MAXPACKET`].
pub fn put_mtu(buf: &mut MsgBuf, mtu: u32) -> Result<()> {
    debug_assert!(mtu > 0);
    debug_assert!(mtu <= IP_MAXPACKET);

    let mut raw = [0; 4];
    NativeEndian::write_u32(&mut raw, mtu);
    buf.put_attr(IFLA_MTU, &raw)
}

/// Append the operational state attribute.
///
/// Userspace may only request the up and down transitions.
pub fn put_oper_state(buf: &mut MsgBuf, state: OperState) -> Result<()> {
    debug_assert!(state == OperState::Up || state == OperState::Down);

    buf.put_attr(IFLA_OPERSTATE, &[state as u8])
}

/// True for locally administered EUI-48 addresses.
fn hwaddr_is_laa(addr: &[u8; 6]) -> bool {
    addr[0] & 0x2 != 0
}

/// True for unicast EUI-48 addresses.
fn hwaddr_is_ucast(addr: &[u8; 6]) -> bool {
    addr[0] & 0x1 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{nla_align, NLA_HDRLEN};
    use crate::msg::NLMSG_HDRLEN;

    // Raw RTM_NEWLINK wire fixtures, built without the composer so the
    // parser is tested on its own.
    struct LinkFixture {
        bytes: Vec<u8>,
    }

    impl LinkFixture {
        fn new(iftype: u16, index: i32) -> LinkFixture {
            let mut bytes = vec![0; NLMSG_HDRLEN + IFINFO_LEN];
            NativeEndian::write_u32(&mut bytes[0..4], (NLMSG_HDRLEN + IFINFO_LEN) as u32);
            NativeEndian::write_u16(&mut bytes[4..6], RTM_NEWLINK);
            let info = NLMSG_HDRLEN;
            NativeEndian::write_u16(&mut bytes[info + 2..info + 4], iftype);
            NativeEndian::write_i32(&mut bytes[info + 4..info + 8], index);
            LinkFixture { bytes }
        }

        fn attr(mut self, id: u16, payload: &[u8]) -> LinkFixture {
            let start = self.bytes.len();
            self.bytes
                .resize(start + nla_align(NLA_HDRLEN + payload.len()), 0);
            NativeEndian::write_u16(
                &mut self.bytes[start..start + 2],
                (NLA_HDRLEN + payload.len()) as u16,
            );
            NativeEndian::write_u16(&mut self.bytes[start + 2..start + 4], id);
            self.bytes[start + NLA_HDRLEN..start + NLA_HDRLEN + payload.len()]
                .copy_from_slice(payload);
            let len = self.bytes.len() as u32;
            NativeEndian::write_u32(&mut self.bytes[0..4], len);
            self
        }

        fn parse(&self) -> Result<Link<'_>> {
            parse_link(&Msg::from_prefix(&self.bytes).unwrap())
        }
    }

    const ARPHRD_ETHER: u16 = 1;
    const ARPHRD_LOOPBACK: u16 = 772;

    #[test]
    fn parses_a_full_record() {
        let fixture = LinkFixture::new(ARPHRD_ETHER, 2)
            .attr(IFLA_ADDRESS, &[0x02, 0, 0, 0, 0, 0x01])
            .attr(IFLA_BROADCAST, &[0xff; 6])
            .attr(IFLA_IFNAME, b"eth0\0")
            .attr(IFLA_MTU, &1500u32.to_ne_bytes())
            .attr(IFLA_LINK, &7u32.to_ne_bytes())
            .attr(IFLA_MASTER, &3u32.to_ne_bytes())
            .attr(IFLA_OPERSTATE, &[OperState::Up as u8])
            .attr(IFLA_GROUP, &9u32.to_ne_bytes())
            .attr(IFLA_PROMISCUITY, &1u32.to_ne_bytes())
            .attr(IFLA_CARRIER, &[OperState::Down as u8]);

        let link = fixture.parse().unwrap();
        assert_eq!(link.iftype, ARPHRD_ETHER);
        assert_eq!(link.index, 2);
        assert_eq!(link.ucast_hwaddr, Some(&[0x02, 0, 0, 0, 0, 0x01]));
        assert_eq!(link.bcast_hwaddr, Some(&[0xff; 6]));
        assert_eq!(link.name, "eth0");
        assert_eq!(link.mtu, 1500);
        assert_eq!(link.link, 7);
        assert_eq!(link.master, 3);
        assert_eq!(link.oper_state, OperState::Up);
        assert_eq!(link.group, 9);
        assert_eq!(link.promisc, 1);
        assert_eq!(link.carrier, OperState::Down);
    }

    #[test]
    fn unknown_attributes_are_skipped() {
        // IFLA_QDISC (6) and IFLA_TXQLEN (13) are outside the schema.
        let fixture = LinkFixture::new(ARPHRD_ETHER, 1)
            .attr(6, b"noqueue\0")
            .attr(IFLA_IFNAME, b"lo\0")
            .attr(13, &1000u32.to_ne_bytes());

        let link = fixture.parse().unwrap();
        assert_eq!(link.name, "lo");
    }

    #[test]
    fn a_nameless_link_is_no_device() {
        let fixture =
            LinkFixture::new(ARPHRD_ETHER, 1).attr(IFLA_MTU, &1500u32.to_ne_bytes());
        assert_eq!(fixture.parse().unwrap_err(), Error::NoDevice);
    }

    #[test]
    fn sentinel_hardware_types_are_rejected() {
        let fixture = LinkFixture::new(ARPHRD_VOID, 1).attr(IFLA_IFNAME, b"x\0");
        assert_eq!(fixture.parse().unwrap_err(), Error::Malformed);

        let fixture = LinkFixture::new(ARPHRD_NONE, 1).attr(IFLA_IFNAME, b"x\0");
        assert_eq!(fixture.parse().unwrap_err(), Error::Malformed);
    }

    #[test]
    fn non_positive_indices_are_rejected() {
        let fixture = LinkFixture::new(ARPHRD_ETHER, 0).attr(IFLA_IFNAME, b"x\0");
        assert_eq!(fixture.parse().unwrap_err(), Error::Malformed);

        let fixture = LinkFixture::new(ARPHRD_ETHER, -4).attr(IFLA_IFNAME, b"x\0");
        assert_eq!(fixture.parse().unwrap_err(), Error::Malformed);
    }

    #[test]
    fn reserved_oper_states_are_rejected() {
        let fixture = LinkFixture::new(ARPHRD_ETHER, 1)
            .attr(IFLA_IFNAME, b"x\0")
            .attr(IFLA_OPERSTATE, &[OperState::Testing as u8]);
        assert_eq!(fixture.parse().unwrap_err(), Error::Malformed);

        let fixture = LinkFixture::new(ARPHRD_ETHER, 1)
            .attr(IFLA_IFNAME, b"x\0")
            .attr(IFLA_CARRIER, &[OperState::NotPresent as u8]);
        assert_eq!(fixture.parse().unwrap_err(), Error::Malformed);
    }

    #[test]
    fn zero_valued_indices_in_attributes_are_out_of_range() {
        let fixture = LinkFixture::new(ARPHRD_ETHER, 1)
            .attr(IFLA_IFNAME, b"x\0")
            .attr(IFLA_LINK, &0u32.to_ne_bytes());
        assert_eq!(fixture.parse().unwrap_err(), Error::OutOfRange);

        let fixture = LinkFixture::new(ARPHRD_ETHER, 1)
            .attr(IFLA_IFNAME, b"x\0")
            .attr(IFLA_MASTER, &0u32.to_ne_bytes());
        assert_eq!(fixture.parse().unwrap_err(), Error::OutOfRange);
    }

    #[test]
    fn the_loopback_mtu_parses() {
        // The loopback device reports an MTU above the IPv4 packet cap;
        // the parser must take the kernel's word for it.
        let fixture = LinkFixture::new(ARPHRD_LOOPBACK, 1)
            .attr(IFLA_IFNAME, b"lo\0")
            .attr(IFLA_MTU, &65536u32.to_ne_bytes());

        let link = fixture.parse().unwrap();
        assert_eq!(link.mtu, 65536);
    }

    #[test]
    fn empty_message_predicate() {
        let fixture = LinkFixture::new(ARPHRD_ETHER, 1);
        assert!(link_msg_is_empty(&Msg::from_prefix(&fixture.bytes).unwrap()));

        let fixture = LinkFixture::new(ARPHRD_ETHER, 1).attr(IFLA_IFNAME, b"x\0");
        assert!(!link_msg_is_empty(&Msg::from_prefix(&fixture.bytes).unwrap()));
    }
}
