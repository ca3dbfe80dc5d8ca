//! Network attacher (§4.6): creates a macvtap or macvlan virtual interface
//! off a host link and moves it straight into the child's network
//! namespace.
//!
//! All functions here create and close a netlink socket on each call.
//! This is redundant but ensures security, by avoiding having privileged sockets
//! lingering around, once the appropriate capabilities have been dropped.
//!
//! The code is largely based upon the internals of the `rtnetlink crate`, thank you!

use anyhow::{bail, Result};
use log::debug;
use netlink_packet_core::{
    ErrorMessage, NetlinkDeserializable, NetlinkHeader, NetlinkMessage, NetlinkPayload,
    NetlinkSerializable, NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST,
};
use netlink_packet_route::{
    link::{InfoKind, LinkAttribute, LinkFlags, LinkInfo, LinkMessage},
    RouteNetlinkMessage,
};
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};

const DEFAULT_BUF_SIZE: usize = 4096;

pub enum VirtualKind {
    MacVtap,
    MacVlan,
}

/// Create a netlink socket and bind it properly
fn create_socket(protocol: isize) -> Result<Socket> {
    let mut socket = Socket::new(protocol)?;
    socket.bind_auto()?;
    socket.connect(&SocketAddr::new(0, 0))?;

    Ok(socket)
}

/// Send `msg` over `socket` and ensure that it has been fully sent
fn send<I: NetlinkSerializable>(socket: &mut Socket, msg: &NetlinkMessage<I>) -> Result<()> {
    // Serialize msg
    let mut buf = vec![0; msg.header.length as usize];
    msg.serialize(&mut buf);

    // Send the message
    let n = socket.send(&buf[..], 0)?;
    if n != buf.len() {
        bail!("netlink sent {n} bytes instead of {} bytes", buf.len());
    }

    Ok(())
}

/// Receive on `socket` and deserialize into `I`
fn recv<I: NetlinkDeserializable>(socket: &mut Socket) -> Result<NetlinkMessage<I>> {
    let mut buf = vec![0_u8; DEFAULT_BUF_SIZE];
    socket.recv(&mut &mut buf[..], 0)?;

    Ok(NetlinkMessage::deserialize(&buf)?)
}

/// Return the index of an interface given by its name
pub fn get_index(name: &str) -> Result<u32> {
    let mut socket = create_socket(NETLINK_ROUTE)?;
    debug!("created netlink socket to find {name}");

    // Construct the netlink message
    let mut link_msg = LinkMessage::default();
    link_msg.attributes.push(LinkAttribute::IfName(name.into()));
    let mut msg = NetlinkMessage::new(
        NetlinkHeader::default(),
        NetlinkPayload::from(RouteNetlinkMessage::GetLink(link_msg)),
    );
    msg.header.flags = NLM_F_REQUEST;
    msg.header.sequence_number = 1;
    msg.finalize();

    send(&mut socket, &msg)?;
    let resp: NetlinkMessage<RouteNetlinkMessage> = recv(&mut socket)?;

    // Parse it down
    let resp = match resp.payload {
        NetlinkPayload::InnerMessage(msg) => msg,
        _ => bail!("did not received NetlinkPayload::InnerMessage"),
    };
    let resp = match resp {
        RouteNetlinkMessage::NewLink(msg) => msg,
        _ => bail!("inner message is not of type RouteNetlinkMessage::NewLink"),
    };

    // Check whether the returned attributes do contain an interface named `name`
    let exists = resp.attributes.iter().any(|attr| match attr {
        LinkAttribute::IfName(iname) => iname == name,
        _ => false,
    });
    if !exists {
        bail!("interface {name} does not seem to exist");
    }

    // Finally, return the index of the interface
    Ok(resp.header.index)
}

/// Set an interface up
pub fn set_up(index: u32) -> Result<()> {
    let mut socket = create_socket(NETLINK_ROUTE)?;
    debug!("created netlink socket to set {index} UP");

    let mut link_msg = LinkMessage::default();
    link_msg.header.index = index;
    link_msg.header.flags = LinkFlags::Up;
    link_msg.header.change_mask = LinkFlags::Up;
    let mut msg = NetlinkMessage::new(
        NetlinkHeader::default(),
        NetlinkPayload::from(RouteNetlinkMessage::SetLink(link_msg)),
    );
    msg.header.flags = NLM_F_REQUEST | NLM_F_ACK | NLM_F_EXCL | NLM_F_CREATE;
    msg.finalize();

    send(&mut socket, &msg)?;
    let resp: NetlinkMessage<RouteNetlinkMessage> = recv(&mut socket)?;

    // Check for errors (ACK is Error with code zero)
    match resp.payload {
        NetlinkPayload::Error(ErrorMessage { code: None, .. }) => {}
        _ => bail!("netlink failed for unknown reasons while setting {index} UP"),
    }
    debug!("setted interface {index} to UP");

    Ok(())
}

/// Creates a macvtap or macvlan interface named `new_name` off `master`,
/// directly inside the network namespace of `pid`. This is one combined
/// `RTM_NEWLINK` rather than create-then-move, since the kernel accepts
/// `IFLA_NET_NS_PID` at creation time.
pub fn create_virtual_iface(
    master: &str,
    new_name: &str,
    kind: VirtualKind,
    pid: u32,
) -> Result<()> {
    let master_index = get_index(master)?;

    let mut socket = create_socket(NETLINK_ROUTE)?;
    debug!("created netlink socket to create {new_name} off {master}");

    let info_kind = match kind {
        VirtualKind::MacVtap => InfoKind::MacVtap,
        VirtualKind::MacVlan => InfoKind::MacVlan,
    };

    let mut link_msg = LinkMessage::default();
    link_msg.attributes.push(LinkAttribute::IfName(new_name.into()));
    link_msg.attributes.push(LinkAttribute::Link(master_index));
    link_msg
        .attributes
        .push(LinkAttribute::LinkInfo(vec![LinkInfo::Kind(info_kind)]));
    link_msg.attributes.push(LinkAttribute::NetNsPid(pid));

    let mut msg = NetlinkMessage::new(
        NetlinkHeader::default(),
        NetlinkPayload::from(RouteNetlinkMessage::NewLink(link_msg)),
    );
    msg.header.flags = NLM_F_REQUEST | NLM_F_ACK | NLM_F_EXCL | NLM_F_CREATE;
    msg.finalize();

    send(&mut socket, &msg)?;
    let resp: NetlinkMessage<RouteNetlinkMessage> = recv(&mut socket)?;

    match resp.payload {
        NetlinkPayload::Error(ErrorMessage { code: None, .. }) => {}
        e => bail!("netlink failed creating {new_name} off {master}: {:#?}", e),
    }
    debug!("created {new_name} off {master} in netns of pid {pid}");

    Ok(())
}
