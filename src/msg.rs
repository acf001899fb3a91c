/*! Netlink message framing.

A netlink datagram is a sequence of messages, each starting with a 16-byte
header: total length, type, flags, sequence number and sender port id.
Control types (noop, error, done, overrun) share the number space below
[`NLMSG_MIN_TYPE`] across every netlink family; everything at or above it
is family payload.

Three layers live here:

* [`Msg`], a borrowed view of one well-formed message;
* [`Msg::classify`], the framer, which maps a header onto exactly one
  [`Disposition`];
* [`walk`], the multipart walker, which drives a handler across every
  message in a received buffer and reports whether the logical stream
  continues in the next datagram.

[`MsgBuf`] is the fixed-capacity transfer buffer the rest of the crate
composes into and receives into.  It is sized for the kernel's dump
ceiling, so a datagram can never arrive truncated by our side.
*/

use crate::attr::NLA_HDRLEN;
use crate::error::{Error, Result};
use byteorder::{ByteOrder, NativeEndian};
use std::fmt;
use tracing::*;

/// Messages are padded to 32-bit boundaries.
pub const NLMSG_ALIGNTO: usize = 4;

/// Round `len` up to the message alignment boundary.
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of `struct nlmsghdr`.
pub const NLMSG_HDRLEN: usize = 16;
/// Size of `struct nlmsgerr`: the error code plus the offending header.
pub const NLMSGERR_LEN: usize = 4 + NLMSG_HDRLEN;

/// The largest datagram the kernel hands out during a dump, and therefore
/// the capacity of every transfer buffer.
pub const XFER_MSG_SIZE: usize = 32768;

// Control message types, from linux/netlink.h.
pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;
pub const NLMSG_OVERRUN: u16 = 4;
/// The first type available to protocol families.
pub const NLMSG_MIN_TYPE: u16 = 0x10;

// Header flags, from linux/netlink.h.
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_ECHO: u16 = 0x08;
pub const NLM_F_DUMP_INTR: u16 = 0x10;
// Modifiers to GET requests.
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

/// A read-only view of one netlink message.
///
/// The view borrows from the datagram buffer it was carved out of and is
/// guaranteed to cover a complete header plus `nlmsg_len` bytes of wire
/// data.
#[derive(Clone, Copy)]
pub struct Msg<'a> {
    bytes: &'a [u8],
}

impl<'a> Msg<'a> {
    /// Carve a message view out of the front of `buf`.
    ///
    /// Returns `None` when the buffer is too short for the advertised
    /// length, mirroring the kernel's `NLMSG_OK` check.
    pub fn from_prefix(buf: &'a [u8]) -> Option<Msg<'a>> {
        if buf.len() < NLMSG_HDRLEN {
            return None;
        }
        let len = NativeEndian::read_u32(&buf[0..4]) as usize;
        if len < NLMSG_HDRLEN || len > buf.len() {
            return None;
        }
        Some(Msg { bytes: &buf[..len] })
    }

    /// Total wire length of the message, header included.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn msg_type(&self) -> u16 {
        NativeEndian::read_u16(&self.bytes[4..6])
    }

    pub fn flags(&self) -> u16 {
        NativeEndian::read_u16(&self.bytes[6..8])
    }

    pub fn seqno(&self) -> u32 {
        NativeEndian::read_u32(&self.bytes[8..12])
    }

    pub fn port_id(&self) -> u32 {
        NativeEndian::read_u32(&self.bytes[12..16])
    }

    /// Everything after the fixed header.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[NLMSG_HDRLEN..]
    }

    /// True when the message is part of a multipart sequence.
    pub fn multipart(&self) -> bool {
        self.flags() & NLM_F_MULTI != 0
    }

    /// Classify this message by its header alone.
    ///
    /// Every header maps onto exactly one disposition.  A header claiming
    /// a dump interruption is [`Disposition::Interrupted`] no matter what
    /// its type says.
    pub fn classify(&self) -> Disposition {
        if self.flags() & NLM_F_DUMP_INTR != 0 {
            return Disposition::Interrupted;
        }
        if self.msg_type() >= NLMSG_MIN_TYPE {
            return Disposition::Payload;
        }
        match self.msg_type() {
            NLMSG_NOOP => Disposition::Empty,
            NLMSG_ERROR => self.classify_error(),
            NLMSG_DONE => Disposition::EndOfSequence,
            NLMSG_OVERRUN => Disposition::Overrun,
            other => {
                debug_assert!(false, "impossible message type {}", other);
                Disposition::Malformed
            }
        }
    }

    fn classify_error(&self) -> Disposition {
        let payload = self.payload();
        if payload.len() < NLMSGERR_LEN {
            return Disposition::Malformed;
        }
        // Netlink subsystems return the errno value with differing signs.
        match NativeEndian::read_i32(&payload[0..4]) {
            0 => Disposition::EndOfSequence, // an ACK
            err if err < 0 => Disposition::Error(err),
            err => Disposition::Error(-err),
        }
    }
}

impl fmt::Display for Msg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let flags = self.flags();
        write!(
            f,
            "pid:{:010} | seqno:{:010} | type:{:05} | flags:{}{}{}{} | length:{:010}",
            self.port_id(),
            self.seqno(),
            self.msg_type(),
            if flags & NLM_F_REQUEST != 0 { 'R' } else { '-' },
            if flags & NLM_F_MULTI != 0 { 'M' } else { '-' },
            if flags & NLM_F_ACK != 0 { 'A' } else { '-' },
            if flags & NLM_F_ECHO != 0 { 'E' } else { '-' },
            self.len(),
        )
    }
}

/// Outcome of classifying one message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The message carries family payload the caller must parse.
    Payload,
    /// An empty placeholder message; skip it.
    Empty,
    /// The kernel restarted its table walk mid-dump and the results are
    /// inconsistent.
    Interrupted,
    /// End of the logical stream: a done marker, or an ACK.
    EndOfSequence,
    /// The kernel rejected the matching request.  Holds the errno,
    /// normalised to a negative value whatever sign the wire carried.
    Error(i32),
    /// The kernel lost data; the rest of the datagram must be discarded.
    Overrun,
    /// An error message too short to carry the error header.
    Malformed,
}

/// Walk every message in a received datagram and drive `handler`.
///
/// The handler sees every payload message and the message that terminates
/// the stream; empty messages are skipped and a dump interruption aborts
/// the walk before the handler hears about it.  A non-`Ok` handler return
/// aborts the walk and is propagated as is.
///
/// Multipart sequences may span datagrams.  When the buffer runs out
/// before an end-of-sequence was seen and the last message carried the
/// multipart flag, the walk returns [`Error::InProgress`]: receive the
/// next datagram and walk again.
pub fn walk<F>(buf: &[u8], mut handler: F) -> Result<()>
where
    F: FnMut(Disposition, Msg<'_>) -> Result<()>,
{
    debug_assert!(Msg::from_prefix(buf).is_some());

    let mut rest = buf;
    let mut multipart = false;
    while let Some(msg) = Msg::from_prefix(rest) {
        let disp = msg.classify();
        trace!("{} -> {:?}", msg, disp);
        match disp {
            Disposition::Payload => handler(disp, msg)?,
            Disposition::Empty => {}
            Disposition::Interrupted => return Err(Error::Interrupted),
            Disposition::EndOfSequence
            | Disposition::Error(_)
            | Disposition::Overrun
            | Disposition::Malformed => return handler(disp, msg),
        }
        multipart = msg.multipart();
        rest = &rest[nlmsg_align(msg.len()).min(rest.len())..];
    }
    if multipart {
        Err(Error::InProgress)
    } else {
        Ok(())
    }
}

/// A fixed-capacity transfer buffer.
///
/// One buffer holds any datagram either side may legally send: requests
/// are composed into it in place, and received datagrams always fit.
/// Parsed records borrow from the buffer, so it must outlive them.
pub struct MsgBuf {
    bytes: Box<[u8]>,
    len: usize,
}

impl MsgBuf {
    pub fn new() -> MsgBuf {
        MsgBuf {
            bytes: vec![0; XFER_MSG_SIZE].into_boxed_slice(),
            len: 0,
        }
    }

    /// The wire bytes composed or received so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the front of the buffer as a message.
    pub fn msg(&self) -> Option<Msg<'_>> {
        Msg::from_prefix(self.as_bytes())
    }

    /// Stamp a fresh header at the start of the buffer, discarding any
    /// previous content.
    pub fn put_header(&mut self, msg_type: u16, flags: u16, seqno: u32, port_id: u32) {
        self.len = NLMSG_HDRLEN;
        let hdr = &mut self.bytes[..NLMSG_HDRLEN];
        NativeEndian::write_u32(&mut hdr[0..4], NLMSG_HDRLEN as u32);
        NativeEndian::write_u16(&mut hdr[4..6], msg_type);
        NativeEndian::write_u16(&mut hdr[6..8], flags);
        NativeEndian::write_u32(&mut hdr[8..12], seqno);
        NativeEndian::write_u32(&mut hdr[12..16], port_id);
    }

    /// Append a zero-filled family info header and hand back a mutable
    /// view of it for the caller to fill in.
    pub fn put_extra_header(&mut self, len: usize) -> &mut [u8] {
        debug_assert!(self.len >= NLMSG_HDRLEN);
        let start = self.len;
        let end = start + nlmsg_align(len);
        debug_assert!(end <= self.bytes.len());
        for byte in &mut self.bytes[start..end] {
            *byte = 0;
        }
        self.set_msg_len(end);
        &mut self.bytes[start..start + len]
    }

    /// Append one TLV attribute, padded to the 32-bit boundary, growing
    /// the message header's length field to match.
    ///
    /// Fails with [`Error::MsgTooLarge`] when the grown message would no
    /// longer fit the buffer.
    pub fn put_attr(&mut self, id: u16, payload: &[u8]) -> Result<()> {
        debug_assert!(self.len >= NLMSG_HDRLEN);
        debug_assert!(payload.len() <= u16::MAX as usize - NLA_HDRLEN);

        let attr_len = NLA_HDRLEN + payload.len();
        let end = self.len + nlmsg_align(attr_len);
        if end > self.bytes.len() {
            return Err(Error::MsgTooLarge);
        }
        let attr = &mut self.bytes[self.len..end];
        NativeEndian::write_u16(&mut attr[0..2], attr_len as u16);
        NativeEndian::write_u16(&mut attr[2..4], id);
        attr[NLA_HDRLEN..attr_len].copy_from_slice(payload);
        for byte in &mut attr[attr_len..] {
            *byte = 0;
        }
        self.set_msg_len(end);
        Ok(())
    }

    fn set_msg_len(&mut self, len: usize) {
        self.len = len;
        NativeEndian::write_u32(&mut self.bytes[0..4], len as u32);
    }

    /// The whole backing store, for the transport to receive into.
    pub(crate) fn recv_space(&mut self) -> &mut [u8] {
        &mut self.bytes[..]
    }

    /// Record how many bytes the transport wrote into [`recv_space`].
    ///
    /// [`recv_space`]: MsgBuf::recv_space
    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.bytes.len());
        self.len = len;
    }
}

impl Default for MsgBuf {
    fn default() -> MsgBuf {
        MsgBuf::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A hand-rolled message builder, independent of MsgBuf's composer.
    fn push_msg(buf: &mut Vec<u8>, msg_type: u16, flags: u16, seqno: u32, payload: &[u8]) {
        let len = NLMSG_HDRLEN + payload.len();
        let mut hdr = [0; NLMSG_HDRLEN];
        NativeEndian::write_u32(&mut hdr[0..4], len as u32);
        NativeEndian::write_u16(&mut hdr[4..6], msg_type);
        NativeEndian::write_u16(&mut hdr[6..8], flags);
        NativeEndian::write_u32(&mut hdr[8..12], seqno);
        buf.extend_from_slice(&hdr);
        buf.extend_from_slice(payload);
        buf.resize(nlmsg_align(buf.len()), 0);
    }

    fn error_payload(errno: i32) -> Vec<u8> {
        let mut payload = vec![0; NLMSGERR_LEN];
        NativeEndian::write_i32(&mut payload[0..4], errno);
        payload
    }

    fn classify_one(buf: &[u8]) -> Disposition {
        Msg::from_prefix(buf).unwrap().classify()
    }

    #[test]
    fn classifies_control_types() {
        let mut noop = Vec::new();
        push_msg(&mut noop, NLMSG_NOOP, 0, 1, &[]);
        assert_eq!(classify_one(&noop), Disposition::Empty);

        let mut done = Vec::new();
        push_msg(&mut done, NLMSG_DONE, 0, 1, &[]);
        assert_eq!(classify_one(&done), Disposition::EndOfSequence);

        let mut overrun = Vec::new();
        push_msg(&mut overrun, NLMSG_OVERRUN, 0, 1, &[]);
        assert_eq!(classify_one(&overrun), Disposition::Overrun);

        let mut payload = Vec::new();
        push_msg(&mut payload, NLMSG_MIN_TYPE, 0, 1, &[]);
        assert_eq!(classify_one(&payload), Disposition::Payload);
    }

    #[test]
    fn dump_interrupt_wins_over_the_type() {
        let mut buf = Vec::new();
        push_msg(&mut buf, NLMSG_DONE, NLM_F_MULTI | NLM_F_DUMP_INTR, 1, &[]);
        assert_eq!(classify_one(&buf), Disposition::Interrupted);
    }

    #[test]
    fn error_codes_are_normalised_negative() {
        let mut neg = Vec::new();
        push_msg(&mut neg, NLMSG_ERROR, 0, 1, &error_payload(-libc::ENODEV));
        assert_eq!(classify_one(&neg), Disposition::Error(-libc::ENODEV));

        // Some subsystems deliver the errno positive.
        let mut pos = Vec::new();
        push_msg(&mut pos, NLMSG_ERROR, 0, 1, &error_payload(libc::ENODEV));
        assert_eq!(classify_one(&pos), Disposition::Error(-libc::ENODEV));
    }

    #[test]
    fn zero_code_error_is_an_ack() {
        let mut buf = Vec::new();
        push_msg(&mut buf, NLMSG_ERROR, 0, 1, &error_payload(0));
        assert_eq!(classify_one(&buf), Disposition::EndOfSequence);
    }

    #[test]
    fn short_error_message_is_malformed() {
        let mut buf = Vec::new();
        push_msg(&mut buf, NLMSG_ERROR, 0, 1, &[0; 4]);
        assert_eq!(classify_one(&buf), Disposition::Malformed);
    }

    #[test]
    fn walker_skips_noops_and_stops_at_done() {
        let mut buf = Vec::new();
        push_msg(&mut buf, NLMSG_NOOP, 0, 1, &[]);
        push_msg(&mut buf, NLMSG_MIN_TYPE, 0, 1, &[0; 16]);
        push_msg(&mut buf, NLMSG_DONE, 0, 1, &[]);
        // Anything after the end-of-sequence is never visited.
        push_msg(&mut buf, NLMSG_MIN_TYPE, 0, 1, &[0; 16]);

        let mut seen = Vec::new();
        walk(&buf, |disp, _| {
            seen.push(disp);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![Disposition::Payload, Disposition::EndOfSequence]
        );
    }

    #[test]
    fn walker_propagates_handler_aborts() {
        let mut buf = Vec::new();
        push_msg(&mut buf, NLMSG_MIN_TYPE, 0, 1, &[0; 16]);
        push_msg(&mut buf, NLMSG_MIN_TYPE, 0, 2, &[0; 16]);

        let mut calls = 0;
        let err = walk(&buf, |_, _| {
            calls += 1;
            Err(Error::NoDevice)
        });
        assert_eq!(err, Err(Error::NoDevice));
        assert_eq!(calls, 1);
    }

    #[test]
    fn walker_surfaces_interrupts_without_the_handler() {
        let mut buf = Vec::new();
        push_msg(&mut buf, NLMSG_MIN_TYPE, NLM_F_DUMP_INTR, 1, &[0; 16]);

        let err = walk(&buf, |_, _| panic!("handler must not run"));
        assert_eq!(err, Err(Error::Interrupted));
    }

    #[test]
    fn walker_reports_multipart_continuation() {
        let mut buf = Vec::new();
        push_msg(&mut buf, NLMSG_MIN_TYPE, NLM_F_MULTI, 1, &[0; 16]);
        push_msg(&mut buf, NLMSG_MIN_TYPE, NLM_F_MULTI, 1, &[0; 16]);

        let err = walk(&buf, |_, _| Ok(()));
        assert_eq!(err, Err(Error::InProgress));

        // The next datagram carries the done marker and ends the stream.
        let mut buf = Vec::new();
        push_msg(&mut buf, NLMSG_DONE, NLM_F_MULTI, 1, &[]);
        assert_eq!(walk(&buf, |_, _| Ok(())), Ok(()));
    }

    #[test]
    fn buffer_grows_header_length_with_attributes() {
        let mut buf = MsgBuf::new();
        buf.put_header(NLMSG_MIN_TYPE, NLM_F_REQUEST, 42, 7);
        buf.put_extra_header(16);
        buf.put_attr(4, &1500u32.to_ne_bytes()).unwrap();

        let msg = buf.msg().unwrap();
        assert_eq!(msg.len(), NLMSG_HDRLEN + 16 + 8);
        assert_eq!(msg.seqno(), 42);
        assert_eq!(msg.port_id(), 7);
        assert_eq!(msg.payload().len(), 16 + 8);
    }

    #[test]
    fn buffer_refuses_overflow() {
        let mut buf = MsgBuf::new();
        buf.put_header(NLMSG_MIN_TYPE, 0, 1, 0);
        let big = vec![0u8; 9000];
        loop {
            match buf.put_attr(1, &big) {
                Ok(()) => assert!(buf.len() <= XFER_MSG_SIZE),
                Err(err) => {
                    assert_eq!(err, Error::MsgTooLarge);
                    break;
                }
            }
        }
        // The buffer is still consistent after the refusal.
        assert_eq!(buf.msg().unwrap().len(), buf.len());
    }
}
