//! Protocol messages exchanged between nodes.
//!
//! Every frame on the wire is a [`Message`]: a one-byte [`MessageType`]
//! followed by the length-prefixed encoding of the matching payload struct.
//! [`Payload`] is the decoded form the server dispatches on.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::types::Bytes;
use crate::types::encoding::{Decode, DecodeError, Encode};
use ledger_derive::BinaryCodec;

/// Version reported in [`StatusMessage`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Discriminant for message payload types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub enum MessageType {
    Tx = 0x1,
    Block = 0x2,
    GetBlocks = 0x3,
    Status = 0x4,
    GetStatus = 0x5,
    Blocks = 0x6,
}

/// Framed message with type header and serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct Message {
    pub header: MessageType,
    pub data: Bytes,
}

/// Request for the blocks `from..=to`; `to == 0` means up to the
/// receiver's current height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub struct GetBlocksMessage {
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct StatusMessage {
    /// Node id of the sender.
    pub id: String,
    pub version: u32,
    pub current_height: u32,
}

#[derive(Debug, Clone, BinaryCodec)]
pub struct BlocksMessage {
    pub blocks: Vec<Block>,
}

/// Decoded message body, one variant per [`MessageType`].
#[derive(Debug, Clone)]
pub enum Payload {
    Tx(Transaction),
    Block(Block),
    GetBlocks(GetBlocksMessage),
    Status(StatusMessage),
    GetStatus,
    Blocks(BlocksMessage),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Tx(_) => MessageType::Tx,
            Payload::Block(_) => MessageType::Block,
            Payload::GetBlocks(_) => MessageType::GetBlocks,
            Payload::Status(_) => MessageType::Status,
            Payload::GetStatus => MessageType::GetStatus,
            Payload::Blocks(_) => MessageType::Blocks,
        }
    }

    /// Wraps the payload in its envelope.
    pub fn to_message(&self) -> Message {
        let data = match self {
            Payload::Tx(tx) => tx.to_bytes(),
            Payload::Block(block) => block.to_bytes(),
            Payload::GetBlocks(request) => request.to_bytes(),
            Payload::Status(status) => status.to_bytes(),
            Payload::GetStatus => Bytes::new(),
            Payload::Blocks(blocks) => blocks.to_bytes(),
        };
        Message {
            header: self.message_type(),
            data,
        }
    }

    /// Encoded envelope, ready to hand to a transport.
    pub fn encode_message(&self) -> Bytes {
        self.to_message().to_bytes()
    }

    /// Decodes the body of `message` according to its header.
    pub fn from_message(message: &Message) -> Result<Self, DecodeError> {
        let data = message.data.as_ref();
        Ok(match message.header {
            MessageType::Tx => Payload::Tx(Transaction::from_bytes(data)?),
            MessageType::Block => Payload::Block(Block::from_bytes(data)?),
            MessageType::GetBlocks => Payload::GetBlocks(GetBlocksMessage::from_bytes(data)?),
            MessageType::Status => Payload::Status(StatusMessage::from_bytes(data)?),
            MessageType::GetStatus => {
                if !data.is_empty() {
                    return Err(DecodeError::InvalidValue);
                }
                Payload::GetStatus
            }
            MessageType::Blocks => Payload::Blocks(BlocksMessage::from_bytes(data)?),
        })
    }
}

/// Raw message received from a peer, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rpc {
    /// Address of the sender.
    pub from: String,
    /// Encoded [`Message`].
    pub payload: Bytes,
}

impl Rpc {
    pub fn new(from: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            from: from.into(),
            payload: payload.into(),
        }
    }

    /// Decodes the envelope and its body.
    pub fn decode(&self) -> Result<DecodedMessage, DecodeError> {
        let message = Message::from_bytes(&self.payload)?;
        Ok(DecodedMessage {
            from: self.from.clone(),
            payload: Payload::from_message(&message)?,
        })
    }
}

/// A fully decoded RPC message with sender and typed payload.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub from: String,
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::genesis_block;
    use crate::crypto::key_pair::PrivateKey;
    use crate::utils::test_utils::utils::{next_block, signed_tx};

    fn through_wire(payload: &Payload) -> Payload {
        Rpc::new("peer", payload.encode_message())
            .decode()
            .unwrap()
            .payload
    }

    #[test]
    fn transaction_keeps_its_hash() {
        let tx = signed_tx(b"payload");
        match through_wire(&Payload::Tx(tx.clone())) {
            Payload::Tx(decoded) => {
                assert_eq!(decoded.hash(), tx.hash());
                assert!(decoded.verify().is_ok());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn block_keeps_its_hash() {
        let block = next_block(
            genesis_block().header(),
            vec![signed_tx(b"a"), signed_tx(b"b")],
            &PrivateKey::new(),
        );
        match through_wire(&Payload::Block(block.clone())) {
            Payload::Block(decoded) => {
                assert_eq!(decoded.hash(), block.hash());
                assert!(decoded.verify().is_ok());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn sync_messages() {
        let request = GetBlocksMessage { from: 4, to: 0 };
        assert!(matches!(
            through_wire(&Payload::GetBlocks(request)),
            Payload::GetBlocks(decoded) if decoded == request
        ));

        let status = StatusMessage {
            id: "node-a".into(),
            version: PROTOCOL_VERSION,
            current_height: 12,
        };
        assert!(matches!(
            through_wire(&Payload::Status(status.clone())),
            Payload::Status(decoded) if decoded == status
        ));

        assert!(matches!(through_wire(&Payload::GetStatus), Payload::GetStatus));

        let blocks = vec![genesis_block(), genesis_block()];
        match through_wire(&Payload::Blocks(BlocksMessage { blocks })) {
            Payload::Blocks(decoded) => {
                assert_eq!(decoded.blocks.len(), 2);
                assert_eq!(decoded.blocks[0].hash(), genesis_block().hash());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn header_byte_matches_message_type() {
        let encoded = Payload::GetStatus.encode_message();
        assert_eq!(encoded[0], 0x5);
        assert_eq!(&encoded[1..], &0u32.to_le_bytes());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut encoded = Payload::GetStatus.encode_message().to_vec();
        encoded[0] = 0x9;
        assert!(Rpc::new("peer", encoded).decode().is_err());
    }

    #[test]
    fn mismatched_body_is_rejected() {
        let message = Message {
            header: MessageType::Block,
            data: GetBlocksMessage { from: 1, to: 2 }.to_bytes(),
        };
        assert!(Payload::from_message(&message).is_err());
    }
}
