//! TLS 1.3 post-handshake messages: KeyUpdate and NewSessionTicket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use zeroize::Zeroize;

use super::context::{crypto_error, Action};
use crate::buffer::Buf;
use crate::codec;
use crate::crypto::cipher::CipherSlots;
use crate::crypto::key_schedule::Tls13Kdf;
use crate::message::new_session_ticket::MAX_TICKET_LIFETIME;
use crate::message::{HandshakeMessage, KeyUpdate, NewSessionTicket};
use crate::rng::SeededRng;
use crate::session::Session;
use crate::types::{CipherSuite, ContentType, HandshakeType, ProtocolVersion};
use crate::{Config, Error};

const TICKET_LEN: usize = 32;

pub(crate) struct PostHandshakeContext {
    config: Arc<Config>,
    is_client: bool,
    suite: CipherSuite,
    kdf: Tls13Kdf,
    resumption_master_secret: Buf,
    /// `host:port` tickets are filed under (client).
    peer: Option<String>,
    peer_chain: Vec<Vec<u8>>,
    rng: SeededRng,
    tickets_issued: u64,
}

impl PostHandshakeContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        is_client: bool,
        suite: CipherSuite,
        kdf: Tls13Kdf,
        resumption_master_secret: Buf,
        peer: Option<String>,
        peer_chain: Vec<Vec<u8>>,
    ) -> Self {
        PostHandshakeContext {
            rng: SeededRng::new(config.rng_seed().map(|s| s.wrapping_add(1))),
            config,
            is_client,
            suite,
            kdf,
            resumption_master_secret,
            peer,
            peer_chain,
            tickets_issued: 0,
        }
    }

    pub fn handle_message(
        &mut self,
        message: HandshakeMessage,
        slots: &CipherSlots,
        now: Instant,
    ) -> Result<Vec<Action>, Error> {
        match message.msg_type {
            HandshakeType::KeyUpdate => self.handle_key_update(&message.body, slots),
            HandshakeType::NewSessionTicket if self.is_client => {
                let ticket = codec::parse_all(&message.body, NewSessionTicket::parse)?;
                self.handle_ticket(ticket, now);
                Ok(Vec::new())
            }
            t => Err(Error::unexpected_message(format!(
                "{:?} after the handshake",
                t
            ))),
        }
    }

    fn handle_key_update(&mut self, body: &[u8], slots: &CipherSlots) -> Result<Vec<Action>, Error> {
        let update = KeyUpdate::parse(body)?;
        let provider = self.config.crypto_provider();
        let read = slots.read().next_generation(provider)?;
        debug!("Peer KeyUpdate (update_requested: {})", update.is_requested());

        let mut actions = vec![Action::InstallRead(read)];
        if update.is_requested() {
            actions.extend(self.key_update(false, slots)?);
        }
        Ok(actions)
    }

    /// Send KeyUpdate and move to the next write key.
    pub fn key_update(&mut self, requested: bool, slots: &CipherSlots) -> Result<Vec<Action>, Error> {
        let write = slots.write().next_generation(self.config.crypto_provider())?;
        let mut body = Buf::new();
        KeyUpdate::new(requested).serialize(&mut body);
        Ok(vec![
            Action::Send(ContentType::Handshake, encode(HandshakeType::KeyUpdate, body)?),
            Action::InstallWrite(write),
        ])
    }

    fn handle_ticket(&mut self, ticket: NewSessionTicket, now: Instant) {
        let lifetime = ticket
            .lifetime
            .min(MAX_TICKET_LIFETIME)
            .min(self.config.ticket_lifetime().as_secs() as u32);
        if lifetime == 0 {
            debug!("Discarding NewSessionTicket with zero lifetime");
            return;
        }
        let psk = match self
            .kdf
            .resumption_psk(&self.resumption_master_secret, &ticket.nonce)
        {
            Ok(psk) => psk,
            Err(e) => {
                warn!("Discarding NewSessionTicket: {}", e);
                return;
            }
        };

        let session = Session::new(
            ticket.ticket,
            ProtocolVersion::TLS1_3,
            self.suite,
            psk,
            false,
            self.peer_chain.clone(),
            now,
            Duration::from_secs(lifetime as u64),
            ticket.age_add,
        );
        debug!("Stored session ticket ({}s)", lifetime);
        self.config
            .session_cache()
            .insert(session, self.peer.as_deref());
    }

    /// Issue a NewSessionTicket and remember the session it resumes.
    pub fn new_session_ticket(&mut self, now: Instant) -> Result<Vec<Action>, Error> {
        let lifetime = self.config.ticket_lifetime();
        let mut ticket = Buf::new();
        ticket.resize(TICKET_LEN, 0);
        self.rng.fill(&mut ticket);
        let nonce = Buf::from_slice(&self.tickets_issued.to_be_bytes());
        self.tickets_issued += 1;
        let age_add: u32 = self.rng.random();

        let psk = self
            .kdf
            .resumption_psk(&self.resumption_master_secret, &nonce)
            .map_err(crypto_error("resumption psk"))?;
        let session = Session::new(
            ticket.clone(),
            ProtocolVersion::TLS1_3,
            self.suite,
            psk,
            false,
            self.peer_chain.clone(),
            now,
            lifetime,
            age_add,
        );
        self.config.session_cache().insert(session, None);

        let message = NewSessionTicket {
            lifetime: lifetime.as_secs() as u32,
            age_add,
            nonce,
            ticket,
            extensions: Vec::new(),
        };
        let mut body = Buf::new();
        message.serialize(&mut body)?;
        debug!("Issued session ticket ({}s)", message.lifetime);
        Ok(vec![Action::Send(
            ContentType::Handshake,
            encode(HandshakeType::NewSessionTicket, body)?,
        )])
    }
}

impl Drop for PostHandshakeContext {
    fn drop(&mut self) {
        self.resumption_master_secret.zeroize();
    }
}

fn encode(msg_type: HandshakeType, body: Buf) -> Result<Buf, Error> {
    Ok(HandshakeMessage::new(msg_type, body).encode(false)?)
}
