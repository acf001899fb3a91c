/*!

A pure-Rust client for the Linux rtnetlink link-management protocol.

Netlink is the datagram socket family Linux uses for configuration
traffic between userspace and the kernel.  rtnetlink is its routing
subfamily, and the link object — one network interface — is the part
this crate speaks: enumerating devices, reading their state, and asking
the kernel to change it.

The crate is deliberately thin.  It owns the wire protocol and the
control-plane bookkeeping, and nothing else:

* [`MsgBuf`] — a fixed-capacity transfer buffer sized for the kernel's
  dump ceiling, composed into and received into in place.
* [`Attr`]/[`AttrIter`] — typed extraction of TLV attributes, borrowing
  straight from the datagram.
* [`Msg::classify`] and [`walk`] — the framer and the multipart walker,
  which turn a received buffer of concatenated messages into a stream of
  well-defined dispositions with correct termination, error and
  cross-datagram continuation semantics.
* [`parse_link`] and the `compose_*`/`put_*` functions — the link codec.
* [`Sock`] — the kernel socket: open/bind, send/recv, multicast group
  membership, sequence-number allocation, port-id verification.
* [`Win`] — a fixed-capacity window of in-flight requests keyed by
  sequence number, for pipelining transactions.

A round-trip looks like this: acquire a descriptor from the window,
compose a request into a fresh buffer (stamping it with the socket's next
sequence number), schedule the descriptor under that number, send, and
then walk each received datagram.  The walker's handler pulls the
matching descriptor by the reply's sequence number and decodes payload
messages with the codec.  The walker returns [`Error::InProgress`] when a
multipart reply continues in the next datagram.

The library is single-threaded cooperative: no locks, no background
tasks.  Every operation takes its socket, window and buffer by explicit
reference, and only the transport calls can block.

*/

mod attr;
mod error;
mod link;
mod msg;
mod sock;
mod win;

pub use crate::attr::{nla_align, Attr, AttrIter, NLA_ALIGNTO, NLA_HDRLEN, NLA_TYPE_MASK};
pub use crate::error::{Error, Result};
pub use crate::link::{
    compose_dump_links, compose_new_link, link_msg_is_empty, parse_link, put_mtu, put_name,
    put_oper_state, put_ucast_hwaddr, Link, OperState, ARPHRD_NONE, ARPHRD_VOID, IFINFO_LEN,
    IFNAMSIZ, IP_MAXPACKET, RTM_DELLINK, RTM_GETLINK, RTM_NEWLINK,
};
pub use crate::msg::{
    nlmsg_align, walk, Disposition, Msg, MsgBuf, NLMSG_ALIGNTO, NLMSG_DONE, NLMSG_ERROR,
    NLMSG_HDRLEN, NLMSG_MIN_TYPE, NLMSG_NOOP, NLMSG_OVERRUN, NLMSGERR_LEN, NLM_F_ACK,
    NLM_F_DUMP, NLM_F_DUMP_INTR, NLM_F_ECHO, NLM_F_MATCH, NLM_F_MULTI, NLM_F_REQUEST,
    NLM_F_ROOT, XFER_MSG_SIZE,
};
pub use crate::sock::{
    Sock, RTNLGRP_IPV4_IFADDR, RTNLGRP_IPV4_ROUTE, RTNLGRP_IPV6_IFADDR, RTNLGRP_IPV6_ROUTE,
    RTNLGRP_LINK, RTNLGRP_MAX, RTNLGRP_NEIGH, RTNLGRP_NONE, RTNLGRP_NOTIFY, RTNLGRP_TC,
};
pub use crate::win::{Win, WorkId};
