//! Wire message encoding.
//!
//! Every message starts with a one-byte opcode followed by big-endian,
//! length-prefixed fields. Framing, TLS, and retransmission belong to the
//! transport layer; this module only turns parsed frames into typed
//! messages and back.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use serac_codec::{Packer, UnpackError, Unpacker};
use serac_ids::{Id, ID_LEN};

/// Maximum containers a single MultiPut may carry.
pub const MAX_CONTAINERS_PER_MULTIPUT: usize = 2000;

/// Message opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    GetVersion = 0,
    Version = 1,
    GetPeerList = 2,
    PeerList = 3,
    Ping = 4,
    Pong = 5,
    GetAcceptedFrontier = 6,
    AcceptedFrontier = 7,
    GetAccepted = 8,
    Accepted = 9,
    GetAncestors = 10,
    MultiPut = 11,
    Get = 12,
    Put = 13,
    PushQuery = 14,
    PullQuery = 15,
    Chits = 16,
}

impl Op {
    /// Decodes an opcode byte.
    pub fn from_byte(byte: u8) -> Result<Self, MessageError> {
        Ok(match byte {
            0 => Op::GetVersion,
            1 => Op::Version,
            2 => Op::GetPeerList,
            3 => Op::PeerList,
            4 => Op::Ping,
            5 => Op::Pong,
            6 => Op::GetAcceptedFrontier,
            7 => Op::AcceptedFrontier,
            8 => Op::GetAccepted,
            9 => Op::Accepted,
            10 => Op::GetAncestors,
            11 => Op::MultiPut,
            12 => Op::Get,
            13 => Op::Put,
            14 => Op::PushQuery,
            15 => Op::PullQuery,
            16 => Op::Chits,
            other => return Err(MessageError::UnknownOp(other)),
        })
    }
}

/// Errors decoding or encoding a message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The opcode byte is not recognized.
    #[error("unknown opcode: {0}")]
    UnknownOp(u8),

    /// The payload was truncated or malformed.
    #[error("malformed message: {0}")]
    Unpack(#[from] UnpackError),

    /// The payload had bytes after the last field.
    #[error("trailing bytes after message")]
    TrailingBytes,

    /// The address family is neither 4 nor 6.
    #[error("invalid ip family: {0}")]
    BadIpFamily(u16),

    /// A MultiPut exceeded the container cap.
    #[error("multiput carries {0} containers but max is {max}", max = MAX_CONTAINERS_PER_MULTIPUT)]
    TooManyContainers(usize),

    /// Encoding failed.
    #[error("packing failed: {0}")]
    Pack(String),
}

/// A network endpoint: family tag, 16-byte address, port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddr {
    /// IP address.
    pub addr: IpAddr,
    /// TCP port.
    pub port: u16,
}

impl NetAddr {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    fn pack(&self, packer: &mut Packer) {
        match self.addr {
            IpAddr::V4(v4) => {
                packer.pack_short(4);
                packer.pack_fixed_bytes(&v4.to_ipv6_mapped().octets());
            }
            IpAddr::V6(v6) => {
                packer.pack_short(6);
                packer.pack_fixed_bytes(&v6.octets());
            }
        }
        packer.pack_short(self.port);
    }

    fn unpack(unpacker: &mut Unpacker<'_>) -> Result<Self, MessageError> {
        let family = unpacker.unpack_short()?;
        let octets = unpacker.unpack_fixed_bytes::<16>()?;
        let port = unpacker.unpack_short()?;
        let addr = match family {
            4 => {
                let mut v4 = [0u8; 4];
                v4.copy_from_slice(&octets[12..]);
                IpAddr::V4(Ipv4Addr::from(v4))
            }
            6 => IpAddr::V6(Ipv6Addr::from(octets)),
            other => return Err(MessageError::BadIpFamily(other)),
        };
        Ok(Self { addr, port })
    }
}

/// A typed wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    GetVersion,
    Version {
        network_id: u32,
        node_id: u32,
        my_time: u64,
        ip: NetAddr,
        version: String,
    },
    GetPeerList,
    PeerList {
        peers: Vec<NetAddr>,
    },
    Ping,
    Pong,
    GetAcceptedFrontier {
        chain_id: Id,
        request_id: u32,
        deadline: u64,
    },
    AcceptedFrontier {
        chain_id: Id,
        request_id: u32,
        container_ids: Vec<Id>,
    },
    GetAccepted {
        chain_id: Id,
        request_id: u32,
        deadline: u64,
        container_ids: Vec<Id>,
    },
    Accepted {
        chain_id: Id,
        request_id: u32,
        container_ids: Vec<Id>,
    },
    GetAncestors {
        chain_id: Id,
        request_id: u32,
        deadline: u64,
        container_id: Id,
    },
    MultiPut {
        chain_id: Id,
        request_id: u32,
        containers: Vec<Vec<u8>>,
    },
    Get {
        chain_id: Id,
        request_id: u32,
        deadline: u64,
        container_id: Id,
    },
    Put {
        chain_id: Id,
        request_id: u32,
        container_id: Id,
        container: Vec<u8>,
    },
    PushQuery {
        chain_id: Id,
        request_id: u32,
        deadline: u64,
        container_id: Id,
        container: Vec<u8>,
    },
    PullQuery {
        chain_id: Id,
        request_id: u32,
        deadline: u64,
        container_id: Id,
    },
    Chits {
        chain_id: Id,
        request_id: u32,
        container_ids: Vec<Id>,
    },
}

fn pack_id_list(packer: &mut Packer, ids: &[Id]) {
    packer.pack_int(ids.len() as u32);
    for id in ids {
        packer.pack_fixed_bytes(id.as_bytes());
    }
}

fn unpack_id(unpacker: &mut Unpacker<'_>) -> Result<Id, MessageError> {
    Ok(Id::from_bytes(unpacker.unpack_fixed_bytes::<ID_LEN>()?))
}

fn unpack_id_list(unpacker: &mut Unpacker<'_>) -> Result<Vec<Id>, MessageError> {
    let count = unpacker.unpack_int()? as usize;
    let mut ids = Vec::new();
    for _ in 0..count {
        ids.push(unpack_id(unpacker)?);
    }
    Ok(ids)
}

impl Message {
    /// The message's opcode.
    #[must_use]
    pub fn op(&self) -> Op {
        match self {
            Message::GetVersion => Op::GetVersion,
            Message::Version { .. } => Op::Version,
            Message::GetPeerList => Op::GetPeerList,
            Message::PeerList { .. } => Op::PeerList,
            Message::Ping => Op::Ping,
            Message::Pong => Op::Pong,
            Message::GetAcceptedFrontier { .. } => Op::GetAcceptedFrontier,
            Message::AcceptedFrontier { .. } => Op::AcceptedFrontier,
            Message::GetAccepted { .. } => Op::GetAccepted,
            Message::Accepted { .. } => Op::Accepted,
            Message::GetAncestors { .. } => Op::GetAncestors,
            Message::MultiPut { .. } => Op::MultiPut,
            Message::Get { .. } => Op::Get,
            Message::Put { .. } => Op::Put,
            Message::PushQuery { .. } => Op::PushQuery,
            Message::PullQuery { .. } => Op::PullQuery,
            Message::Chits { .. } => Op::Chits,
        }
    }

    /// Encodes the message, opcode first.
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        let mut packer = Packer::new(128);
        packer.pack_byte(self.op() as u8);
        match self {
            Message::GetVersion | Message::GetPeerList | Message::Ping | Message::Pong => {}
            Message::Version {
                network_id,
                node_id,
                my_time,
                ip,
                version,
            } => {
                packer.pack_int(*network_id);
                packer.pack_int(*node_id);
                packer.pack_long(*my_time);
                ip.pack(&mut packer);
                packer.pack_str(version);
            }
            Message::PeerList { peers } => {
                packer.pack_int(peers.len() as u32);
                for peer in peers {
                    peer.pack(&mut packer);
                }
            }
            Message::GetAcceptedFrontier {
                chain_id,
                request_id,
                deadline,
            } => {
                packer.pack_fixed_bytes(chain_id.as_bytes());
                packer.pack_int(*request_id);
                packer.pack_long(*deadline);
            }
            Message::AcceptedFrontier {
                chain_id,
                request_id,
                container_ids,
            }
            | Message::Accepted {
                chain_id,
                request_id,
                container_ids,
            }
            | Message::Chits {
                chain_id,
                request_id,
                container_ids,
            } => {
                packer.pack_fixed_bytes(chain_id.as_bytes());
                packer.pack_int(*request_id);
                pack_id_list(&mut packer, container_ids);
            }
            Message::GetAccepted {
                chain_id,
                request_id,
                deadline,
                container_ids,
            } => {
                packer.pack_fixed_bytes(chain_id.as_bytes());
                packer.pack_int(*request_id);
                packer.pack_long(*deadline);
                pack_id_list(&mut packer, container_ids);
            }
            Message::GetAncestors {
                chain_id,
                request_id,
                deadline,
                container_id,
            }
            | Message::Get {
                chain_id,
                request_id,
                deadline,
                container_id,
            }
            | Message::PullQuery {
                chain_id,
                request_id,
                deadline,
                container_id,
            } => {
                packer.pack_fixed_bytes(chain_id.as_bytes());
                packer.pack_int(*request_id);
                packer.pack_long(*deadline);
                packer.pack_fixed_bytes(container_id.as_bytes());
            }
            Message::MultiPut {
                chain_id,
                request_id,
                containers,
            } => {
                if containers.len() > MAX_CONTAINERS_PER_MULTIPUT {
                    return Err(MessageError::TooManyContainers(containers.len()));
                }
                packer.pack_fixed_bytes(chain_id.as_bytes());
                packer.pack_int(*request_id);
                packer.pack_int(containers.len() as u32);
                for container in containers {
                    packer.pack_bytes(container);
                }
            }
            Message::Put {
                chain_id,
                request_id,
                container_id,
                container,
            } => {
                packer.pack_fixed_bytes(chain_id.as_bytes());
                packer.pack_int(*request_id);
                packer.pack_fixed_bytes(container_id.as_bytes());
                packer.pack_bytes(container);
            }
            Message::PushQuery {
                chain_id,
                request_id,
                deadline,
                container_id,
                container,
            } => {
                packer.pack_fixed_bytes(chain_id.as_bytes());
                packer.pack_int(*request_id);
                packer.pack_long(*deadline);
                packer.pack_fixed_bytes(container_id.as_bytes());
                packer.pack_bytes(container);
            }
        }
        packer.finish().map_err(|e| MessageError::Pack(e.to_string()))
    }

    /// Decodes a message. The whole buffer must be consumed.
    pub fn unpack(bytes: &[u8]) -> Result<Self, MessageError> {
        let mut unpacker = Unpacker::new(bytes);
        let op = Op::from_byte(unpacker.unpack_byte()?)?;

        let message = match op {
            Op::GetVersion => Message::GetVersion,
            Op::GetPeerList => Message::GetPeerList,
            Op::Ping => Message::Ping,
            Op::Pong => Message::Pong,
            Op::Version => Message::Version {
                network_id: unpacker.unpack_int()?,
                node_id: unpacker.unpack_int()?,
                my_time: unpacker.unpack_long()?,
                ip: NetAddr::unpack(&mut unpacker)?,
                version: unpacker.unpack_string()?,
            },
            Op::PeerList => {
                let count = unpacker.unpack_int()? as usize;
                let mut peers = Vec::new();
                for _ in 0..count {
                    peers.push(NetAddr::unpack(&mut unpacker)?);
                }
                Message::PeerList { peers }
            }
            Op::GetAcceptedFrontier => Message::GetAcceptedFrontier {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                deadline: unpacker.unpack_long()?,
            },
            Op::AcceptedFrontier => Message::AcceptedFrontier {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                container_ids: unpack_id_list(&mut unpacker)?,
            },
            Op::GetAccepted => Message::GetAccepted {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                deadline: unpacker.unpack_long()?,
                container_ids: unpack_id_list(&mut unpacker)?,
            },
            Op::Accepted => Message::Accepted {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                container_ids: unpack_id_list(&mut unpacker)?,
            },
            Op::GetAncestors => Message::GetAncestors {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                deadline: unpacker.unpack_long()?,
                container_id: unpack_id(&mut unpacker)?,
            },
            Op::MultiPut => {
                let chain_id = unpack_id(&mut unpacker)?;
                let request_id = unpacker.unpack_int()?;
                let count = unpacker.unpack_int()? as usize;
                if count > MAX_CONTAINERS_PER_MULTIPUT {
                    return Err(MessageError::TooManyContainers(count));
                }
                let mut containers = Vec::new();
                for _ in 0..count {
                    containers.push(unpacker.unpack_bytes()?);
                }
                Message::MultiPut {
                    chain_id,
                    request_id,
                    containers,
                }
            }
            Op::Get => Message::Get {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                deadline: unpacker.unpack_long()?,
                container_id: unpack_id(&mut unpacker)?,
            },
            Op::Put => Message::Put {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                container_id: unpack_id(&mut unpacker)?,
                container: unpacker.unpack_bytes()?,
            },
            Op::PushQuery => Message::PushQuery {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                deadline: unpacker.unpack_long()?,
                container_id: unpack_id(&mut unpacker)?,
                container: unpacker.unpack_bytes()?,
            },
            Op::PullQuery => Message::PullQuery {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                deadline: unpacker.unpack_long()?,
                container_id: unpack_id(&mut unpacker)?,
            },
            Op::Chits => Message::Chits {
                chain_id: unpack_id(&mut unpacker)?,
                request_id: unpacker.unpack_int()?,
                container_ids: unpack_id_list(&mut unpacker)?,
            },
        };

        if !unpacker.is_empty() {
            return Err(MessageError::TrailingBytes);
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> Id {
        Id::from_bytes([byte; 32])
    }

    fn roundtrip(message: Message) {
        let bytes = message.pack().unwrap();
        assert_eq!(Message::unpack(&bytes).unwrap(), message);
    }

    #[test]
    fn handshake_messages() {
        roundtrip(Message::GetVersion);
        roundtrip(Message::Ping);
        roundtrip(Message::Pong);
        roundtrip(Message::GetPeerList);
        roundtrip(Message::Version {
            network_id: 1,
            node_id: 7,
            my_time: 1_600_000_000,
            ip: NetAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 9651),
            version: "serac/0.1.0".into(),
        });
        roundtrip(Message::PeerList {
            peers: vec![
                NetAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9651),
                NetAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 9651),
            ],
        });
    }

    #[test]
    fn bootstrap_messages() {
        roundtrip(Message::GetAcceptedFrontier {
            chain_id: id(1),
            request_id: 2,
            deadline: 3,
        });
        roundtrip(Message::AcceptedFrontier {
            chain_id: id(1),
            request_id: 2,
            container_ids: vec![id(3), id(4)],
        });
        roundtrip(Message::GetAccepted {
            chain_id: id(1),
            request_id: 2,
            deadline: 3,
            container_ids: vec![id(4)],
        });
        roundtrip(Message::Accepted {
            chain_id: id(1),
            request_id: 2,
            container_ids: vec![],
        });
        roundtrip(Message::GetAncestors {
            chain_id: id(1),
            request_id: 2,
            deadline: 3,
            container_id: id(4),
        });
        roundtrip(Message::MultiPut {
            chain_id: id(1),
            request_id: 2,
            containers: vec![vec![1, 2, 3], vec![], vec![9]],
        });
    }

    #[test]
    fn consensus_messages() {
        roundtrip(Message::Get {
            chain_id: id(1),
            request_id: 2,
            deadline: 3,
            container_id: id(4),
        });
        roundtrip(Message::Put {
            chain_id: id(1),
            request_id: 2,
            container_id: id(4),
            container: vec![5, 6],
        });
        roundtrip(Message::PushQuery {
            chain_id: id(1),
            request_id: 2,
            deadline: 3,
            container_id: id(4),
            container: vec![5, 6],
        });
        roundtrip(Message::PullQuery {
            chain_id: id(1),
            request_id: 2,
            deadline: 3,
            container_id: id(4),
        });
        roundtrip(Message::Chits {
            chain_id: id(1),
            request_id: 2,
            container_ids: vec![id(4)],
        });
    }

    #[test]
    fn opcode_is_first_byte() {
        let bytes = Message::Chits {
            chain_id: id(1),
            request_id: 2,
            container_ids: vec![],
        }
        .pack()
        .unwrap();
        assert_eq!(bytes[0], Op::Chits as u8);
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert!(matches!(
            Message::unpack(&[99]),
            Err(MessageError::UnknownOp(99))
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = Message::Ping.pack().unwrap();
        bytes.push(0);
        assert!(matches!(
            Message::unpack(&bytes),
            Err(MessageError::TrailingBytes)
        ));
    }

    #[test]
    fn truncated_message_rejected() {
        let bytes = Message::GetAcceptedFrontier {
            chain_id: id(1),
            request_id: 2,
            deadline: 3,
        }
        .pack()
        .unwrap();
        assert!(Message::unpack(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn multiput_cap_enforced() {
        let message = Message::MultiPut {
            chain_id: id(1),
            request_id: 2,
            containers: vec![vec![]; MAX_CONTAINERS_PER_MULTIPUT + 1],
        };
        assert!(matches!(
            message.pack(),
            Err(MessageError::TooManyContainers(_))
        ));
    }
}
