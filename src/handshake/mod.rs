//! Handshake state machines.
//!
//! [`Handshake`] is what the connection drives while a handshake is in
//! flight. Every inbound message goes through [`Handshake::handle_message`],
//! which keeps the transcript and the action queue consistent: the message
//! is held in the transcript while its handler runs, and either becomes part
//! of it together with all queued actions, or neither happens.

pub(crate) mod client;
pub(crate) mod context;
pub(crate) mod extensions;
pub(crate) mod kx;
pub(crate) mod post;
pub(crate) mod server;
pub(crate) mod transcript;

use std::time::Instant;

use self::client::ClientHandshake;
use self::context::{Action, HandshakeContext};
use self::server::ServerHandshake;
use crate::alert::AlertDescription;
use crate::message::HandshakeMessage;
use crate::types::HandshakeType;
use crate::Error;

pub(crate) enum Handshake {
    Client(ClientHandshake),
    Server(ServerHandshake),
}

impl Handshake {
    pub fn ctx(&self) -> &HandshakeContext {
        match self {
            Handshake::Client(c) => &c.ctx,
            Handshake::Server(s) => &s.ctx,
        }
    }

    fn ctx_mut(&mut self) -> &mut HandshakeContext {
        match self {
            Handshake::Client(c) => &mut c.ctx,
            Handshake::Server(s) => &mut s.ctx,
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Handshake::Client(_))
    }

    pub fn is_done(&self) -> bool {
        match self {
            Handshake::Client(c) => c.is_done(),
            Handshake::Server(s) => s.is_done(),
        }
    }

    pub fn is_renegotiation(&self) -> bool {
        self.ctx().is_renegotiation()
    }

    /// The server asked for a renegotiation and is waiting for the hello.
    pub fn awaiting_renegotiation_hello(&self) -> bool {
        match self {
            Handshake::Server(s) => s.awaiting_renegotiation_hello(),
            Handshake::Client(_) => false,
        }
    }

    /// Produce the first flight. Only the client has one.
    pub fn start(&mut self, now: Instant) -> Result<Vec<Action>, Error> {
        self.ctx_mut().now = now;
        let result = match self {
            Handshake::Client(c) => c.start(),
            Handshake::Server(_) => Ok(()),
        };
        self.commit(result)
    }

    /// Ask the client to renegotiate (server only).
    pub fn send_hello_request(&mut self) -> Result<Vec<Action>, Error> {
        let result = match self {
            Handshake::Server(s) => s.send_hello_request(),
            Handshake::Client(_) => Err(Error::internal_error("HelloRequest from a client")),
        };
        self.commit(result)
    }

    /// Dispatch one complete handshake message.
    ///
    /// `raw` is the message as received, header included.
    pub fn handle_message(
        &mut self,
        raw: &[u8],
        message: &HandshakeMessage,
        now: Instant,
    ) -> Result<Vec<Action>, Error> {
        if message.msg_type == HandshakeType::HelloRequest {
            return match self {
                Handshake::Client(_) => {
                    message.expect_empty()?;
                    debug!("Ignoring HelloRequest during a handshake");
                    Ok(Vec::new())
                }
                Handshake::Server(_) => Err(Error::unexpected_message("HelloRequest from client")),
            };
        }
        trace!("Received {:?}", message.msg_type);

        let ctx = self.ctx_mut();
        ctx.now = now;
        ctx.transcript.hold(raw);

        let result = match self {
            Handshake::Client(c) => c.handle(message),
            Handshake::Server(s) => s.handle(message),
        };
        if result.is_ok() {
            self.ctx_mut().transcript.utilize();
        }
        self.commit(result)
    }

    pub fn handle_change_cipher_spec(&mut self) -> Result<Vec<Action>, Error> {
        let result = match self {
            Handshake::Client(c) => c.handle_change_cipher_spec(),
            Handshake::Server(s) => s.handle_change_cipher_spec(),
        };
        self.commit(result)
    }

    /// A warning alert other than close_notify or user_canceled.
    pub fn handle_warning(&mut self, description: AlertDescription) -> Result<Vec<Action>, Error> {
        let result = match self {
            Handshake::Client(_) => Err(Error::handshake_failure(format!(
                "{} warning during the handshake",
                description.name()
            ))),
            Handshake::Server(s) => s.handle_warning(description),
        };
        self.commit(result)
    }

    /// The actions of a successful step, or nothing at all.
    fn commit(&mut self, result: Result<(), Error>) -> Result<Vec<Action>, Error> {
        let ctx = self.ctx_mut();
        match result {
            Ok(()) => Ok(ctx.take_actions()),
            Err(e) => {
                ctx.actions.clear();
                ctx.transcript.discard_pending();
                Err(e)
            }
        }
    }
}
