//! A TLS or DTLS connection, sans IO.
//!
//! The connection owns the record layer and everything around the handshake:
//! it frames and protects records, reassembles handshake messages, applies
//! the alert and renegotiation policies, and hands post-handshake messages to
//! the TLS 1.3 [`PostHandshakeContext`].
//!
//! Driving it works the same way for both roles:
//!
//! 1. feed bytes from the transport to [`Connection::handle_packet`],
//! 2. call [`Connection::handle_timeout`] when the last [`Output::Timeout`]
//!    has passed (a client's first call sends the ClientHello),
//! 3. drain [`Connection::poll_output`] until it returns [`Output::Timeout`].
//!
//! Every error is fatal. The alert matching the error is queued for the
//! peer before it is returned, and the connection refuses further input.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::buffer::Buf;
use crate::codec::{self, CodecError};
use crate::crypto::cipher::{CipherSlots, MAX_FRAGMENT_LEN};
use crate::handshake::client::ClientHandshake;
use crate::handshake::context::{Action, Completion, Exporter, Renegotiation};
use crate::handshake::post::PostHandshakeContext;
use crate::handshake::server::ServerHandshake;
use crate::handshake::Handshake;
use crate::message::handshake::{complete_message_len, Header};
use crate::message::{change_cipher_spec, HandshakeMessage};
use crate::record::{self, Record, ReplayWindow, DTLS_MAX_SEQ, MAX_CIPHERTEXT_LEN};
use crate::record::{dtls_seq, TLS_HEADER_LEN};
use crate::session::Session;
use crate::types::{CipherSuite, ContentType, HandshakeType, ProtocolVersion};
use crate::{Config, Error};

const DISTANT_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// DTLS handshake messages from the future kept while a gap is open.
const MAX_BUFFERED_MESSAGES: usize = 16;

/// Output events
#[derive(Debug, PartialEq, Eq)]
pub enum Output<'a> {
    /// A packet to send to the remote peer.
    Packet(&'a [u8]),
    /// The handshake completed. Renegotiations do not repeat this.
    Connected,
    /// The peer's leaf certificate, once it passed validation.
    PeerCert(&'a [u8]),
    /// Decrypted application data.
    ApplicationData(&'a [u8]),
    /// The peer sent close_notify. Nothing more will be received.
    Closed,
    /// Nothing more to do before this instant.
    Timeout(Instant),
}

enum Event {
    Connected,
    PeerCert(Buf),
    ApplicationData(Buf),
    Closed,
}

/// Parameters of the last completed handshake.
struct Established {
    version: ProtocolVersion,
    suite: CipherSuite,
    resumed: bool,
    renegotiation: Renegotiation,
    exporter: Exporter,
    peer_chain: Vec<Vec<u8>>,
    session: Option<Arc<Session>>,
}

pub struct Connection {
    config: Arc<Config>,
    is_client: bool,
    dtls: bool,
    /// `host:port` the client connects to.
    peer: Option<String>,
    now: Instant,

    slots: CipherSlots,
    replay: ReplayWindow,
    record_version: ProtocolVersion,

    handshake: Option<Handshake>,
    handshake_deadline: Option<Instant>,
    post: Option<PostHandshakeContext>,
    established: Option<Established>,

    /// Stream bytes not yet forming a complete record.
    rx: Buf,
    /// Handshake bytes not yet forming a complete message (TLS).
    handshake_rx: Buf,
    /// Next DTLS message_seq to accept. `None` accepts any.
    dtls_recv_seq: Option<u16>,
    dtls_future: BTreeMap<u16, Buf>,
    read_key_changed: bool,

    queue_tx: VecDeque<Buf>,
    events: VecDeque<Event>,
    /// Holder of the last polled output, to be able to return a reference.
    last: Option<Buf>,

    user_canceled: bool,
    input_closed: bool,
    output_closed: bool,
    failed: bool,
}

impl Connection {
    /// Client connection to `peer` (`host:port`).
    ///
    /// The host part becomes the server_name, and the whole string is the
    /// key sessions are cached under.
    pub fn new_client(config: Arc<Config>, peer: Option<&str>, now: Instant) -> Result<Self, Error> {
        if config.certificate_validator().is_none() {
            return Err(Error::ConfigError(
                "a client needs a certificate validator".into(),
            ));
        }
        let peer = peer.map(str::to_string);
        let handshake = ClientHandshake::new(config.clone(), peer.clone(), now, None)?;
        Ok(Self::new(config, true, peer, Handshake::Client(handshake), now))
    }

    pub fn new_server(config: Arc<Config>, now: Instant) -> Result<Self, Error> {
        if config.identity().is_none() {
            return Err(Error::ConfigError("a server needs an identity".into()));
        }
        let handshake = ServerHandshake::new(config.clone(), now, None);
        Ok(Self::new(config, false, None, Handshake::Server(handshake), now))
    }

    fn new(
        config: Arc<Config>,
        is_client: bool,
        peer: Option<String>,
        handshake: Handshake,
        now: Instant,
    ) -> Self {
        let record_version = if config.datagram() {
            ProtocolVersion::DTLS1_0
        } else if config.is_version_enabled(ProtocolVersion::SSL3_0) {
            ProtocolVersion::SSL3_0
        } else {
            ProtocolVersion::TLS1_0
        };

        Connection {
            dtls: config.datagram(),
            config,
            is_client,
            peer,
            now,
            slots: CipherSlots::default(),
            replay: ReplayWindow::new(),
            record_version,
            handshake: Some(handshake),
            handshake_deadline: None,
            post: None,
            established: None,
            rx: Buf::new(),
            handshake_rx: Buf::new(),
            dtls_recv_seq: None,
            dtls_future: BTreeMap::new(),
            read_key_changed: false,
            queue_tx: VecDeque::new(),
            events: VecDeque::new(),
            last: None,
            user_canceled: false,
            input_closed: false,
            output_closed: false,
            failed: false,
        }
    }

    pub fn is_client(&self) -> bool {
        self.is_client
    }

    /// A handshake completed and the connection has not failed.
    pub fn is_connected(&self) -> bool {
        self.established.is_some() && !self.failed
    }

    /// A handshake (initial or renegotiation) is in flight.
    pub fn is_handshaking(&self) -> bool {
        self.handshake.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.failed || (self.input_closed && self.output_closed)
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.established.as_ref().map(|e| e.version)
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.established.as_ref().map(|e| e.suite)
    }

    /// The last handshake resumed a session.
    pub fn is_resumed(&self) -> bool {
        self.established.as_ref().is_some_and(|e| e.resumed)
    }

    /// Both sides signalled RFC 5746 secure renegotiation.
    pub fn is_secure_renegotiation(&self) -> bool {
        self.established
            .as_ref()
            .is_some_and(|e| e.renegotiation.secure)
    }

    /// Peer certificate chain, leaf first. Empty when the peer did not
    /// authenticate.
    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        self.established
            .as_ref()
            .map(|e| &e.peer_chain[..])
            .unwrap_or(&[])
    }

    /// The session the last TLS 1.2 handshake created or resumed.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.established.as_ref().and_then(|e| e.session.as_ref())
    }

    /// Keying material exporter (RFC 5705, RFC 8446 Section 7.5).
    pub fn export_keying_material(
        &self,
        label: &str,
        context: Option<&[u8]>,
        len: usize,
    ) -> Result<Buf, Error> {
        let established = self.established.as_ref().ok_or(Error::NotConnected)?;
        established
            .exporter
            .export(self.config.crypto_provider(), label, context, len)
    }

    /// Feed bytes received from the transport.
    ///
    /// For DTLS `packet` is one datagram. For TLS it is any slice of the
    /// byte stream.
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.failed || self.input_closed {
            return Err(Error::ConnectionClosed);
        }
        let result = if self.dtls {
            self.handle_datagram(packet)
        } else {
            self.handle_stream(packet)
        };
        self.check(result)
    }

    /// Advance time. The first call on a client sends the ClientHello.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.failed {
            return Err(Error::ConnectionClosed);
        }
        self.now = now;
        let result = self.drive_timeout(now);
        self.check(result)
    }

    fn drive_timeout(&mut self, now: Instant) -> Result<(), Error> {
        let Some(handshake) = self.handshake.as_mut() else {
            return Ok(());
        };

        let Some(deadline) = self.handshake_deadline else {
            debug!(
                "Handshake timeout in: {:.03}s",
                self.config.handshake_timeout().as_secs_f32()
            );
            self.handshake_deadline = Some(now + self.config.handshake_timeout());
            let actions = handshake.start(now)?;
            return self.apply(actions);
        };

        if now >= deadline {
            return Err(Error::Timeout("handshake"));
        }
        Ok(())
    }

    /// Next thing to do. Call repeatedly until [`Output::Timeout`].
    pub fn poll_output(&mut self) -> Output<'_> {
        if let Some(event) = self.events.pop_front() {
            return match event {
                Event::Connected => Output::Connected,
                Event::Closed => Output::Closed,
                Event::PeerCert(cert) => Output::PeerCert(&self.last.insert(cert)[..]),
                Event::ApplicationData(data) => {
                    Output::ApplicationData(&self.last.insert(data)[..])
                }
            };
        }

        if let Some(packet) = self.queue_tx.pop_front() {
            return Output::Packet(&self.last.insert(packet)[..]);
        }

        Output::Timeout(self.poll_timeout())
    }

    fn poll_timeout(&self) -> Instant {
        match (&self.handshake, self.handshake_deadline) {
            // Not started yet.
            (Some(_), None) => self.now,
            (_, Some(deadline)) => deadline,
            (None, None) => self.now + DISTANT_FUTURE,
        }
    }

    /// Queue application data for the peer.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.failed || self.output_closed {
            return Err(Error::ConnectionClosed);
        }
        if self.established.is_none() {
            return Err(Error::NotConnected);
        }
        let result = self.write_application_data(data);
        self.check(result)
    }

    fn write_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        for chunk in data.chunks(MAX_FRAGMENT_LEN) {
            let mut packet = Buf::new();
            self.write_records(ContentType::ApplicationData, chunk, &mut packet)?;
            self.queue_tx.push_back(packet);

            if self.post.is_some() && self.slots.write().at_key_limit() {
                debug!("Write key reached its limit");
                self.key_update(true)?;
            }
        }
        Ok(())
    }

    /// Send a TLS 1.3 KeyUpdate and move to the next write key.
    ///
    /// With `requested` the peer is asked to update its write key as well.
    pub fn request_key_update(&mut self, requested: bool) -> Result<(), Error> {
        if self.failed || self.output_closed {
            return Err(Error::ConnectionClosed);
        }
        if self.established.is_none() {
            return Err(Error::NotConnected);
        }
        if self.post.is_none() {
            return Err(Error::ConfigError("KeyUpdate requires TLS 1.3".into()));
        }
        let result = self.key_update(requested);
        self.check(result)
    }

    fn key_update(&mut self, requested: bool) -> Result<(), Error> {
        let post = self
            .post
            .as_mut()
            .ok_or_else(|| Error::internal_error("no post-handshake context"))?;
        let actions = post.key_update(requested, &self.slots)?;
        self.apply(actions)
    }

    /// Start a renegotiation (TLS 1.2 and earlier).
    ///
    /// A client sends a new ClientHello, a server sends HelloRequest.
    pub fn request_renegotiation(&mut self) -> Result<(), Error> {
        if self.failed || self.output_closed {
            return Err(Error::ConnectionClosed);
        }
        let Some(established) = &self.established else {
            return Err(Error::NotConnected);
        };
        if self.dtls {
            return Err(Error::ConfigError(
                "renegotiation is not supported over DTLS".into(),
            ));
        }
        if established.version.is_tls13() {
            return Err(Error::ConfigError(
                "renegotiation is not supported in TLS 1.3".into(),
            ));
        }
        if self.handshake.is_some() {
            return Err(Error::ConfigError("a handshake is already in progress".into()));
        }
        if !established.renegotiation.secure && !self.config.allow_unsafe_renegotiation() {
            return Err(Error::ConfigError(
                "peer does not support secure renegotiation".into(),
            ));
        }

        let result = if self.is_client {
            self.start_renegotiation()
        } else {
            self.send_hello_request()
        };
        self.check(result)
    }

    fn previous_handshake(&self) -> Result<Renegotiation, Error> {
        self.established
            .as_ref()
            .map(|e| e.renegotiation.clone())
            .ok_or_else(|| Error::unexpected_message("renegotiation before the handshake"))
    }

    fn start_renegotiation(&mut self) -> Result<(), Error> {
        debug!("Starting renegotiation");
        let previous = self.previous_handshake()?;
        let client = ClientHandshake::new(
            self.config.clone(),
            self.peer.clone(),
            self.now,
            Some(previous),
        )?;
        let mut handshake = Handshake::Client(client);
        let actions = handshake.start(self.now)?;
        self.begin(handshake);
        self.apply(actions)
    }

    fn send_hello_request(&mut self) -> Result<(), Error> {
        debug!("Sending HelloRequest");
        let previous = self.previous_handshake()?;
        let server = ServerHandshake::new(self.config.clone(), self.now, Some(previous));
        let mut handshake = Handshake::Server(server);
        let actions = handshake.send_hello_request()?;
        self.begin(handshake);
        self.apply(actions)
    }

    fn begin(&mut self, handshake: Handshake) {
        self.handshake = Some(handshake);
        self.handshake_deadline = Some(self.now + self.config.handshake_timeout());
    }

    /// Send close_notify. The peer's close_notify surfaces as
    /// [`Output::Closed`].
    pub fn close(&mut self) -> Result<(), Error> {
        if self.failed {
            return Err(Error::ConnectionClosed);
        }
        if self.output_closed {
            return Ok(());
        }
        debug!("Send close_notify");
        let result = self.send_alert(Alert::warning(AlertDescription::CloseNotify));
        self.output_closed = true;
        self.check(result)
    }

    fn check<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            self.fatal(e);
        }
        result
    }

    /// Tear down after an error, telling the peer unless it already knows.
    fn fatal(&mut self, error: &Error) {
        if self.failed {
            return;
        }
        warn!("Connection failed: {}", error);
        let peer_knows = matches!(error, Error::PeerAlert { .. } | Error::ConnectionClosed);
        if !self.output_closed && !peer_knows {
            let description = error.alert_description();
            debug!("Send fatal {} alert", description.name());
            if let Err(e) = self.send_alert(Alert::fatal(description)) {
                debug!("Fatal alert not sent: {}", e);
            }
        }
        self.failed = true;
        self.input_closed = true;
        self.output_closed = true;
        self.handshake = None;
        self.handshake_deadline = None;
        self.post = None;
    }

    fn send_alert(&mut self, alert: Alert) -> Result<(), Error> {
        let mut body = Buf::new();
        alert.serialize(&mut body);
        let mut packet = Buf::new();
        self.write_records(ContentType::Alert, &body, &mut packet)?;
        self.queue_tx.push_back(packet);
        Ok(())
    }

    /// Protect `data` as records of `content_type` appended to `packet`.
    fn write_records(
        &mut self,
        content_type: ContentType,
        data: &[u8],
        packet: &mut Buf,
    ) -> Result<(), Error> {
        let max_seq = if self.dtls { DTLS_MAX_SEQ } else { u64::MAX };
        let mut cipher = self.slots.write();

        for chunk in data.chunks(MAX_FRAGMENT_LEN) {
            let seq = cipher.take_seq(max_seq)?;
            let epoch = cipher.epoch();
            let aead_seq = if self.dtls { dtls_seq(epoch, seq) } else { seq };

            let mut fragment = Buf::from_slice(chunk);
            let outer = cipher.seal(content_type, self.record_version, aead_seq, &mut fragment)?;

            let record = Record {
                content_type: outer,
                version: self.record_version,
                epoch: if self.dtls { epoch } else { 0 },
                sequence_number: if self.dtls { seq } else { 0 },
                fragment,
            };
            record.serialize(self.dtls, packet)?;
        }
        Ok(())
    }

    /// Carry out what a handshake step asked for, in order.
    ///
    /// All records produced go out as one packet.
    fn apply(&mut self, actions: Vec<Action>) -> Result<(), Error> {
        if let Some(version) = self.handshake.as_ref().and_then(|h| h.ctx().version) {
            self.record_version = version.legacy_version();
        }

        let mut packet = Buf::new();
        // Consecutive TLS handshake messages share records.
        let mut handshake = Buf::new();

        for action in actions {
            trace!("Apply {:?}", action);
            match action {
                Action::Send(ContentType::Handshake, message) if !self.dtls => {
                    handshake.extend_from_slice(&message);
                }
                Action::Send(content_type, payload) => {
                    self.flush_handshake(&mut handshake, &mut packet)?;
                    self.write_records(content_type, &payload, &mut packet)?;
                }
                Action::InstallWrite(cipher) => {
                    self.flush_handshake(&mut handshake, &mut packet)?;
                    let epoch = self.slots.install_write(cipher, self.dtls);
                    debug!("Installed write cipher (epoch {})", epoch);
                }
                Action::InstallRead(cipher) => {
                    let epoch = self.slots.install_read(cipher, self.dtls);
                    self.replay.reset();
                    self.read_key_changed = true;
                    debug!("Installed read cipher (epoch {})", epoch);
                }
                Action::Alert(alert) => {
                    self.flush_handshake(&mut handshake, &mut packet)?;
                    debug!("Send {} warning", alert.description.name());
                    let mut body = Buf::new();
                    alert.serialize(&mut body);
                    self.write_records(ContentType::Alert, &body, &mut packet)?;
                }
                Action::PeerCert(leaf) => self.events.push_back(Event::PeerCert(leaf)),
                Action::ResetMessageSeq => {
                    self.dtls_recv_seq = None;
                    self.dtls_future.clear();
                }
                Action::Complete(completion) => self.complete(*completion),
            }
        }

        self.flush_handshake(&mut handshake, &mut packet)?;
        if !packet.is_empty() {
            self.queue_tx.push_back(packet);
        }
        Ok(())
    }

    fn flush_handshake(&mut self, handshake: &mut Buf, packet: &mut Buf) -> Result<(), Error> {
        if !handshake.is_empty() {
            self.write_records(ContentType::Handshake, handshake, packet)?;
            handshake.clear();
        }
        Ok(())
    }

    fn complete(&mut self, mut completion: Completion) {
        let renegotiated = self.established.is_some();
        debug!(
            "{} {} with {:?}{}",
            if renegotiated { "Renegotiated" } else { "Connected" },
            completion.version,
            completion.suite,
            if completion.resumed { " (resumed)" } else { "" }
        );

        self.record_version = completion.version.legacy_version();
        self.post = completion.post.take();
        self.handshake_deadline = None;
        self.established = Some(Established {
            version: completion.version,
            suite: completion.suite,
            resumed: completion.resumed,
            renegotiation: completion.renegotiation,
            exporter: completion.exporter,
            peer_chain: completion.peer_chain,
            session: completion.session,
        });
        if !renegotiated {
            self.events.push_back(Event::Connected);
        }
    }

    fn negotiated_tls13(&self) -> bool {
        match (&self.established, &self.handshake) {
            (Some(e), _) => e.version.is_tls13(),
            (None, Some(h)) => h.ctx().version.is_some_and(|v| v.is_tls13()),
            (None, None) => false,
        }
    }

    fn handle_stream(&mut self, data: &[u8]) -> Result<(), Error> {
        self.rx.extend_from_slice(data);

        while !self.input_closed {
            if self.rx.len() >= TLS_HEADER_LEN {
                let length = u16::from_be_bytes([self.rx[3], self.rx[4]]) as usize;
                if length > MAX_CIPHERTEXT_LEN {
                    return Err(Error::fatal(
                        AlertDescription::RecordOverflow,
                        format!("record of {} bytes", length),
                    ));
                }
            }
            let Some(len) = record::complete_record_len(&self.rx, false) else {
                break;
            };
            let (_, record) = Record::parse(&self.rx[..len], false).map_err(CodecError::from)?;
            self.rx.consume(len);
            self.handle_record(record)?;
        }
        Ok(())
    }

    fn handle_datagram(&mut self, mut input: &[u8]) -> Result<(), Error> {
        while !input.is_empty() && !self.input_closed {
            let (rest, record) = match Record::parse(input, true) {
                Ok(parsed) => parsed,
                Err(_) => {
                    debug!("Dropping {} bytes of malformed datagram", input.len());
                    break;
                }
            };
            input = rest;
            self.handle_record(record)?;
        }
        Ok(())
    }

    fn handle_record(&mut self, mut record: Record) -> Result<(), Error> {
        // TLS 1.3 compatibility mode, the record is never protected.
        if record.content_type == ContentType::ChangeCipherSpec && self.negotiated_tls13() {
            if self.handshake.is_none() {
                return Err(Error::unexpected_message(
                    "ChangeCipherSpec after the TLS 1.3 handshake",
                ));
            }
            change_cipher_spec::parse(&record.fragment)?;
            debug!("Dropping compatibility ChangeCipherSpec");
            return Ok(());
        }

        let content_type = {
            let mut cipher = self.slots.read();
            if self.dtls {
                if record.epoch != cipher.epoch() {
                    debug!(
                        "Dropping record of epoch {} (reading epoch {})",
                        record.epoch,
                        cipher.epoch()
                    );
                    return Ok(());
                }
                if !self.replay.is_fresh(record.sequence_number) {
                    debug!("Dropping replayed record {}", record.sequence_number);
                    return Ok(());
                }
                let seq = dtls_seq(record.epoch, record.sequence_number);
                match cipher.open(record.content_type, record.version, seq, &mut record.fragment)
                {
                    Ok(content_type) => content_type,
                    Err(e) => {
                        debug!("Dropping record {}: {}", record.sequence_number, e);
                        return Ok(());
                    }
                }
            } else {
                let seq = cipher.take_seq(u64::MAX)?;
                cipher.open(record.content_type, record.version, seq, &mut record.fragment)?
            }
        };
        if self.dtls {
            self.replay.mark(record.sequence_number);
        }

        if content_type != ContentType::Handshake && !self.handshake_rx.is_empty() {
            return Err(Error::unexpected_message(format!(
                "{:?} record inside a handshake message",
                content_type
            )));
        }

        match content_type {
            ContentType::Handshake => self.handle_handshake_record(&record.fragment),
            ContentType::ChangeCipherSpec => self.handle_change_cipher_spec(&record.fragment),
            ContentType::Alert => {
                let alert = Alert::parse(&record.fragment)?;
                self.handle_alert(alert)
            }
            ContentType::ApplicationData => self.handle_application_data(record.fragment),
            t => Err(Error::unexpected_message(format!("{:?} record", t))),
        }
    }

    fn handle_application_data(&mut self, data: Buf) -> Result<(), Error> {
        if self.established.is_none() {
            return Err(Error::unexpected_message(
                "application data before the handshake completed",
            ));
        }
        if !data.is_empty() {
            self.events.push_back(Event::ApplicationData(data));
        }
        Ok(())
    }

    fn handle_change_cipher_spec(&mut self, body: &[u8]) -> Result<(), Error> {
        change_cipher_spec::parse(body)?;
        let Some(handshake) = self.handshake.as_mut() else {
            return Err(Error::unexpected_message(
                "ChangeCipherSpec outside a handshake",
            ));
        };
        let actions = handshake.handle_change_cipher_spec()?;
        self.apply(actions)
    }

    fn handle_alert(&mut self, alert: Alert) -> Result<(), Error> {
        let description = alert.description;
        match alert.level {
            AlertLevel::Warning => debug!("Received {} warning", description.name()),
            AlertLevel::Fatal => {
                debug!("Received fatal {} alert", description.name());
                return Err(Error::PeerAlert { description });
            }
            AlertLevel::Unknown(level) => {
                return Err(Error::illegal_parameter(format!("alert level {}", level)))
            }
        }

        match description {
            AlertDescription::CloseNotify => {
                if self.handshake.is_some() {
                    return Err(Error::unexpected_message(
                        "close_notify during the handshake",
                    ));
                }
                self.input_closed = true;
                if !self.output_closed && !self.user_canceled {
                    self.send_alert(Alert::warning(AlertDescription::CloseNotify))?;
                }
                self.output_closed = true;
                self.events.push_back(Event::Closed);
                Ok(())
            }
            AlertDescription::UserCanceled => {
                self.user_canceled = true;
                Ok(())
            }
            // Record layer and internal errors have no warning form.
            AlertDescription::Unknown(_) => self.handle_handshake_warning(description),
            _ if !description.is_handshake_only() => {
                debug!("Treating {} warning as fatal", description.name());
                Err(Error::PeerAlert { description })
            }
            _ => self.handle_handshake_warning(description),
        }
    }

    /// A warning that only means something to a running handshake.
    fn handle_handshake_warning(&mut self, description: AlertDescription) -> Result<(), Error> {
        // Every other alert is fatal in TLS 1.3, whatever its level.
        if self.negotiated_tls13() {
            return Err(Error::PeerAlert { description });
        }
        let Some(handshake) = self.handshake.as_mut() else {
            debug!("Ignoring {} warning", description.name());
            return Ok(());
        };
        if description == AlertDescription::NoRenegotiation
            && handshake.awaiting_renegotiation_hello()
        {
            debug!("Client refused to renegotiate");
            self.handshake = None;
            self.handshake_deadline = None;
            return Ok(());
        }
        let actions = handshake.handle_warning(description)?;
        self.apply(actions)
    }

    fn handle_handshake_record(&mut self, fragment: &[u8]) -> Result<(), Error> {
        if fragment.is_empty() {
            return Err(Error::unexpected_message("empty handshake record"));
        }
        if self.dtls {
            return self.handle_dtls_handshake(fragment);
        }

        self.handshake_rx.extend_from_slice(fragment);
        self.read_key_changed = false;

        loop {
            if self.handshake_rx.len() >= Header::len(false) {
                let (_, header) =
                    Header::parse(&self.handshake_rx, false).map_err(CodecError::from)?;
                self.check_message_size(header.length)?;
            }
            let Some(len) = complete_message_len(&self.handshake_rx, false) else {
                break;
            };
            let raw = Buf::from_slice(&self.handshake_rx[..len]);
            self.handshake_rx.consume(len);

            let message = codec::parse_all(&raw, |i| HandshakeMessage::parse(i, false))?;
            self.dispatch_handshake(&raw, message)?;

            if self.read_key_changed && !self.handshake_rx.is_empty() {
                return Err(Error::unexpected_message(
                    "handshake message spans a key change",
                ));
            }
            if self.failed || self.handshake_rx.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn check_message_size(&self, length: u32) -> Result<(), Error> {
        let max = self.config.max_handshake_message_size();
        if length as usize > max {
            return Err(Error::illegal_parameter(format!(
                "handshake message of {} bytes exceeds {}",
                length, max
            )));
        }
        Ok(())
    }

    fn handle_dtls_handshake(&mut self, mut input: &[u8]) -> Result<(), Error> {
        while !input.is_empty() {
            let (_, header) = Header::parse(input, true).map_err(CodecError::from)?;
            if header.is_fragment() {
                return Err(Error::decode_error("fragmented handshake message"));
            }
            self.check_message_size(header.length)?;

            let len = Header::len(true) + header.length as usize;
            if input.len() < len {
                return Err(Error::decode_error("truncated handshake message"));
            }
            let raw = Buf::from_slice(&input[..len]);
            input = &input[len..];
            self.accept_dtls_message(raw)?;
        }
        Ok(())
    }

    /// Deliver DTLS handshake messages in message_seq order.
    fn accept_dtls_message(&mut self, raw: Buf) -> Result<(), Error> {
        let message = codec::parse_all(&raw, |i| HandshakeMessage::parse(i, true))?;
        let seq = message.message_seq;

        match self.dtls_recv_seq {
            Some(next) if seq < next => {
                debug!("Dropping retransmitted message_seq {}", seq);
                return Ok(());
            }
            Some(next) if seq > next => {
                if self.dtls_future.len() < MAX_BUFFERED_MESSAGES {
                    debug!("Buffering message_seq {} (expecting {})", seq, next);
                    self.dtls_future.insert(seq, raw);
                }
                return Ok(());
            }
            _ => {}
        }

        self.dtls_recv_seq = Some(seq.wrapping_add(1));
        self.dispatch_handshake(&raw, message)?;

        while let Some(next) = self.dtls_recv_seq {
            let Some(raw) = self.dtls_future.remove(&next) else {
                break;
            };
            let message = codec::parse_all(&raw, |i| HandshakeMessage::parse(i, true))?;
            self.dtls_recv_seq = Some(next.wrapping_add(1));
            self.dispatch_handshake(&raw, message)?;
        }
        Ok(())
    }

    fn dispatch_handshake(&mut self, raw: &[u8], message: HandshakeMessage) -> Result<(), Error> {
        let now = self.now;

        if let Some(handshake) = self.handshake.as_mut() {
            let actions = handshake.handle_message(raw, &message, now)?;
            self.apply(actions)?;
            if self.handshake.as_ref().is_some_and(|h| h.is_done()) {
                self.handshake = None;
            }
            return Ok(());
        }

        if let Some(post) = self.post.as_mut() {
            let actions = post.handle_message(message, &self.slots, now)?;
            return self.apply(actions);
        }

        match (self.is_client, message.msg_type) {
            (true, HandshakeType::HelloRequest) => {
                message.expect_empty()?;
                self.accept_hello_request()
            }
            (false, HandshakeType::ClientHello) => self.accept_client_renegotiation(raw, message),
            (_, msg_type) => Err(Error::unexpected_message(format!(
                "{:?} outside a handshake",
                msg_type
            ))),
        }
    }

    fn renegotiation_allowed(&self) -> bool {
        let secure = self.is_secure_renegotiation();
        !self.dtls && (secure || self.config.allow_unsafe_renegotiation())
    }

    fn refuse_renegotiation(&mut self) -> Result<(), Error> {
        debug!("Refusing renegotiation");
        self.apply(vec![Action::Alert(Alert::warning(
            AlertDescription::NoRenegotiation,
        ))])
    }

    fn accept_hello_request(&mut self) -> Result<(), Error> {
        if !self.renegotiation_allowed() {
            return self.refuse_renegotiation();
        }
        self.start_renegotiation()
    }

    fn accept_client_renegotiation(
        &mut self,
        raw: &[u8],
        message: HandshakeMessage,
    ) -> Result<(), Error> {
        if !self.renegotiation_allowed() {
            return self.refuse_renegotiation();
        }
        debug!("Client renegotiates");
        let previous = self.previous_handshake()?;
        let server = ServerHandshake::new(self.config.clone(), self.now, Some(previous));
        self.begin(Handshake::Server(server));
        self.dispatch_handshake(raw, message)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("is_client", &self.is_client)
            .field("dtls", &self.dtls)
            .field("version", &self.protocol_version())
            .field("suite", &self.cipher_suite())
            .field("handshaking", &self.is_handshaking())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{generate_self_signed_certificate, AcceptAnyCertificate};

    fn client_config() -> Arc<Config> {
        Arc::new(
            Config::builder()
                .certificate_validator(Arc::new(AcceptAnyCertificate))
                .rng_seed(3)
                .build()
                .unwrap(),
        )
    }

    fn server_config() -> Arc<Config> {
        let identity = generate_self_signed_certificate("server").unwrap();
        Arc::new(Config::builder().identity(identity).rng_seed(4).build().unwrap())
    }

    fn packets(conn: &mut Connection) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match conn.poll_output() {
                Output::Packet(p) => out.push(p.to_vec()),
                Output::Timeout(_) => break,
                _ => {}
            }
        }
        out
    }

    #[test]
    fn roles_need_their_config() {
        let now = Instant::now();
        let bare = Arc::new(Config::builder().build().unwrap());
        assert!(matches!(
            Connection::new_client(bare.clone(), None, now),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            Connection::new_server(bare, now),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn client_starts_on_first_timeout() {
        let now = Instant::now();
        let mut client = Connection::new_client(client_config(), Some("localhost:443"), now).unwrap();
        assert_eq!(client.poll_output(), Output::Timeout(now));

        client.handle_timeout(now).unwrap();
        let sent = packets(&mut client);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], ContentType::Handshake.as_u8());
        assert_eq!(sent[0][5], HandshakeType::ClientHello.as_u8());
        let handshake_timeout = client.config.handshake_timeout();
        assert_eq!(
            client.poll_output(),
            Output::Timeout(now + handshake_timeout)
        );
    }

    #[test]
    fn handshake_times_out() {
        let now = Instant::now();
        let mut client = Connection::new_client(client_config(), None, now).unwrap();
        client.handle_timeout(now).unwrap();
        packets(&mut client);

        let later = now + client.config.handshake_timeout();
        let err = client.handle_timeout(later).unwrap_err();
        assert!(matches!(err, Error::Timeout("handshake")));
        assert!(client.is_closed());
    }

    #[test]
    fn application_data_before_connect() {
        let mut client = Connection::new_client(client_config(), None, Instant::now()).unwrap();
        assert!(matches!(
            client.send_application_data(b"hello"),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn oversized_record_overflows() {
        let mut server = Connection::new_server(server_config(), Instant::now()).unwrap();
        let err = server.handle_packet(&[22, 3, 3, 0xFF, 0xFF]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::RecordOverflow);

        // The fatal alert is queued and further input refused.
        let sent = packets(&mut server);
        assert_eq!(sent, vec![vec![21, 3, 1, 0, 2, 2, 22]]);
        assert!(matches!(
            server.handle_packet(&[22]),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn close_notify_during_handshake() {
        let mut server = Connection::new_server(server_config(), Instant::now()).unwrap();
        let err = server.handle_packet(&[21, 3, 1, 0, 2, 1, 0]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::UnexpectedMessage);
    }

    #[test]
    fn fatal_alert_from_peer_is_not_answered() {
        let mut server = Connection::new_server(server_config(), Instant::now()).unwrap();
        let err = server.handle_packet(&[21, 3, 1, 0, 2, 2, 40]).unwrap_err();
        assert!(matches!(
            err,
            Error::PeerAlert {
                description: AlertDescription::HandshakeFailure
            }
        ));
        assert!(packets(&mut server).is_empty());
    }

    #[test]
    fn handshake_message_size_limit() {
        let mut server = Connection::new_server(server_config(), Instant::now()).unwrap();
        // ClientHello header claiming 1 MiB.
        let err = server
            .handle_packet(&[22, 3, 1, 0, 4, 1, 0x10, 0, 0])
            .unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::IllegalParameter);
    }
}
