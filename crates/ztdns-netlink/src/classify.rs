//! Raw link updates to interface events

use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::link::nlas::{Nla, State};
use netlink_packet_route::{LinkMessage, RtnlMessage};
use std::collections::HashSet;
use tracing::{trace, warn};
use ztdns_core::traits::{InterfaceEvent, InterfaceEventKind};

fn link_name(link: &LinkMessage) -> Option<String> {
    link.nlas.iter().find_map(|nla| match nla {
        Nla::IfName(name) => Some(name.clone()),
        _ => None,
    })
}

fn is_up(link: &LinkMessage) -> bool {
    link.nlas
        .iter()
        .find_map(|nla| match nla {
            Nla::OperState(state) => Some(matches!(state, State::Up)),
            _ => None,
        })
        .unwrap_or((link.header.flags & libc::IFF_UP as u32) != 0)
}

/// Classify one routing message
///
/// `known` holds the names seen so far and is kept up to date: a new-link
/// message for an unknown name is `Added`, a del-link message is `Removed`,
/// any other new-link message is `Up` or `Down` by operational state.
pub fn classify(message: &RtnlMessage, known: &mut HashSet<String>) -> Option<InterfaceEvent> {
    match message {
        RtnlMessage::DelLink(link) => {
            let name = link_name(link)?;
            known.remove(&name);
            Some(InterfaceEvent::new(name, InterfaceEventKind::Removed, link.header.index))
        }
        RtnlMessage::NewLink(link) => {
            let name = link_name(link)?;
            let kind = if known.insert(name.clone()) {
                InterfaceEventKind::Added
            } else if is_up(link) {
                InterfaceEventKind::Up
            } else {
                InterfaceEventKind::Down
            };
            Some(InterfaceEvent::new(name, kind, link.header.index))
        }
        _ => None,
    }
}

/// Decode every netlink message in one datagram
pub fn decode(buf: &[u8], known: &mut HashSet<String>) -> Vec<InterfaceEvent> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let message = match NetlinkMessage::<RtnlMessage>::deserialize(&buf[offset..]) {
            Ok(message) => message,
            Err(e) => {
                warn!("Undecodable netlink message: {}", e);
                break;
            }
        };

        if let NetlinkPayload::InnerMessage(inner) = &message.payload
            && let Some(event) = classify(inner, known)
        {
            trace!("Link {} {}", event.name, event.kind);
            events.push(event);
        }

        let length = message.header.length as usize;
        if length == 0 {
            break;
        }
        offset += length;
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(name: &str, index: u32, nlas: Vec<Nla>) -> LinkMessage {
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.nlas.push(Nla::IfName(name.to_string()));
        message.nlas.extend(nlas);
        message
    }

    #[test]
    fn test_new_unknown_link_is_added() {
        let mut known = HashSet::new();
        let event = classify(&RtnlMessage::NewLink(link("zt0", 4, vec![])), &mut known).unwrap();
        assert_eq!(event, InterfaceEvent::new("zt0", InterfaceEventKind::Added, 4));
        assert!(known.contains("zt0"));
    }

    #[test]
    fn test_known_link_reports_oper_state() {
        let mut known = HashSet::from(["zt0".to_string()]);

        let up = RtnlMessage::NewLink(link("zt0", 4, vec![Nla::OperState(State::Up)]));
        assert_eq!(classify(&up, &mut known).unwrap().kind, InterfaceEventKind::Up);

        let down = RtnlMessage::NewLink(link("zt0", 4, vec![Nla::OperState(State::Down)]));
        assert_eq!(classify(&down, &mut known).unwrap().kind, InterfaceEventKind::Down);
    }

    #[test]
    fn test_flags_used_without_oper_state() {
        let mut known = HashSet::from(["zt0".to_string()]);
        let mut message = link("zt0", 4, vec![]);
        message.header.flags = libc::IFF_UP as u32;
        assert_eq!(
            classify(&RtnlMessage::NewLink(message), &mut known).unwrap().kind,
            InterfaceEventKind::Up
        );
    }

    #[test]
    fn test_del_link_is_removed() {
        let mut known = HashSet::from(["zt0".to_string()]);
        let event = classify(&RtnlMessage::DelLink(link("zt0", 4, vec![])), &mut known).unwrap();
        assert_eq!(event.kind, InterfaceEventKind::Removed);
        assert!(known.is_empty());
    }

    #[test]
    fn test_nameless_link_is_ignored() {
        let mut known = HashSet::new();
        assert!(classify(&RtnlMessage::NewLink(LinkMessage::default()), &mut known).is_none());
    }
}
