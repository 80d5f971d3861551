//! Ticket table correlating replies with pending requests.

use ssp_types::constants::{FIRST_TICKET, LAST_TICKET};
use ssp_types::ProtocolFault;
use ssp_wire::Message;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Receives the ack/reply/nack messages for one ticket.
pub type TicketReceiver = mpsc::UnboundedReceiver<Message>;

/// Pending tickets and the allocation cursor.
#[derive(Debug, Default)]
pub struct Tickets {
    pending: HashMap<u8, mpsc::UnboundedSender<Message>>,
    last: u8,
}

impl Tickets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the next free ticket after the last one handed out, wrapping
    /// within `FIRST_TICKET..=LAST_TICKET`.
    pub fn allocate(&mut self) -> Result<(u8, TicketReceiver), ProtocolFault> {
        let span = LAST_TICKET - FIRST_TICKET + 1;
        for _ in 0..span {
            self.last = if self.last >= LAST_TICKET || self.last < FIRST_TICKET {
                FIRST_TICKET
            } else {
                self.last + 1
            };
            if !self.pending.contains_key(&self.last) {
                let (tx, rx) = mpsc::unbounded_channel();
                self.pending.insert(self.last, tx);
                return Ok((self.last, rx));
            }
        }
        Err(ProtocolFault::TicketsExhausted)
    }

    pub fn release(&mut self, tk: u8) {
        self.pending.remove(&tk);
    }

    pub fn is_pending(&self, tk: u8) -> bool {
        self.pending.contains_key(&tk)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Hands a reply, ack or nack to its waiter. Replies and nacks release
    /// the ticket, acks keep it.
    pub fn dispatch(&mut self, message: Message) -> Result<(), ProtocolFault> {
        let tk = message.ticket().ok_or(ProtocolFault::MissingTicket)?;
        let releases = !matches!(message, Message::Ack { .. });
        let sender = if releases {
            self.pending.remove(&tk)
        } else {
            self.pending.get(&tk).cloned()
        };
        let sender = sender.ok_or(ProtocolFault::UnknownTicket { ticket: tk })?;
        // The waiter may have given up already.
        let _ = sender.send(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssp_codec::Value;
    use ssp_types::ErrorCode;

    #[test]
    fn test_allocation_wraps_and_skips_pending() {
        let mut tickets = Tickets::new();
        let (first, _rx1) = tickets.allocate().unwrap();
        assert_eq!(first, 1);
        let (second, _rx2) = tickets.allocate().unwrap();
        assert_eq!(second, 2);

        tickets.last = LAST_TICKET;
        // 1 and 2 are taken
        let (next, _rx3) = tickets.allocate().unwrap();
        assert_eq!(next, 3);
    }

    #[test]
    fn test_exhaustion() {
        let mut tickets = Tickets::new();
        let mut held = Vec::new();
        for _ in 0..LAST_TICKET {
            held.push(tickets.allocate().unwrap());
        }
        assert_eq!(tickets.len(), 249);
        assert_eq!(tickets.allocate().unwrap_err(), ProtocolFault::TicketsExhausted);

        tickets.release(100);
        let (tk, _rx) = tickets.allocate().unwrap();
        assert_eq!(tk, 100);
    }

    #[test]
    fn test_ack_keeps_ticket_reply_releases() {
        let mut tickets = Tickets::new();
        let (tk, mut rx) = tickets.allocate().unwrap();

        tickets
            .dispatch(Message::Ack { from: 3, tk, body: Value::Int(50) })
            .unwrap();
        assert!(tickets.is_pending(tk));
        tickets
            .dispatch(Message::Reply { from: 3, tk, body: Value::Null })
            .unwrap();
        assert!(!tickets.is_pending(tk));

        assert!(matches!(rx.try_recv().unwrap(), Message::Ack { .. }));
        assert!(matches!(rx.try_recv().unwrap(), Message::Reply { .. }));
    }

    #[test]
    fn test_unknown_ticket() {
        let mut tickets = Tickets::new();
        let err = tickets
            .dispatch(Message::Nack { from: 3, tk: 77, code: ErrorCode::Fail })
            .unwrap_err();
        assert_eq!(err, ProtocolFault::UnknownTicket { ticket: 77 });
    }
}
