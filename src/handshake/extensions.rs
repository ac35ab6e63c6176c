//! Extension registry.
//!
//! Each hello-type message has a table of [`ExtensionSpec`]s. Consuming the
//! message's extensions runs in phases:
//!
//! 1. framing checks: no duplicates, `pre_shared_key` last;
//! 2. `on_load` for every registered extension that is present, parsing the
//!    payload into the target;
//! 3. `on_absence` for every registered extension that is missing, enforcing
//!    "X requires Y" rules;
//! 4. `on_trade` for every registered extension that is present, once all
//!    payloads are known and cross-extension checks can run.
//!
//! Extensions without a spec are ignored. A client additionally rejects any
//! extension it did not offer, see [`check_solicited`].

use crate::alert::AlertDescription;
use crate::buffer::Buf;
use crate::message::extensions::*;
use crate::message::{Extension, ExtensionType};
use crate::types::{NamedGroup, ProtocolVersion, PskKeyExchangeMode, SignatureScheme};
use crate::Error;

pub(crate) type LoadFn<C> = fn(&mut C, &Extension) -> Result<(), Error>;
pub(crate) type CheckFn<C> = fn(&mut C) -> Result<(), Error>;

pub(crate) struct ExtensionSpec<C> {
    pub ext: ExtensionType,
    pub on_load: LoadFn<C>,
    pub on_absence: Option<CheckFn<C>>,
    pub on_trade: Option<CheckFn<C>>,
}

impl<C> ExtensionSpec<C> {
    const fn new(ext: ExtensionType, on_load: LoadFn<C>) -> Self {
        ExtensionSpec {
            ext,
            on_load,
            on_absence: None,
            on_trade: None,
        }
    }

    const fn absence(mut self, f: CheckFn<C>) -> Self {
        self.on_absence = Some(f);
        self
    }

    const fn trade(mut self, f: CheckFn<C>) -> Self {
        self.on_trade = Some(f);
        self
    }
}

/// Run the registry phases over `extensions` into `target`.
pub(crate) fn consume<C>(
    specs: &[ExtensionSpec<C>],
    extensions: &[Extension],
    target: &mut C,
) -> Result<(), Error> {
    for (i, ext) in extensions.iter().enumerate() {
        if extensions[..i]
            .iter()
            .any(|e| e.extension_type == ext.extension_type)
        {
            return Err(Error::illegal_parameter(format!(
                "duplicate extension {:?}",
                ext.extension_type
            )));
        }
        if ext.extension_type == ExtensionType::PreSharedKey && i + 1 != extensions.len() {
            return Err(Error::illegal_parameter("pre_shared_key is not the last extension"));
        }
    }

    let find = |t: ExtensionType| extensions.iter().find(|e| e.extension_type == t);

    for spec in specs {
        if let Some(ext) = find(spec.ext) {
            (spec.on_load)(target, ext)?;
        }
    }

    for spec in specs {
        if find(spec.ext).is_none() {
            if let Some(on_absence) = spec.on_absence {
                on_absence(target)?;
            }
        }
    }

    for spec in specs {
        if find(spec.ext).is_some() {
            if let Some(on_trade) = spec.on_trade {
                on_trade(target)?;
            }
        }
    }

    Ok(())
}

/// A server may only answer with extensions the client offered.
pub(crate) fn check_solicited(
    extensions: &[Extension],
    offered: &[ExtensionType],
) -> Result<(), Error> {
    match extensions
        .iter()
        .find(|e| !offered.contains(&e.extension_type))
    {
        Some(e) => Err(Error::fatal(
            AlertDescription::UnsupportedExtension,
            format!("unsolicited extension {:?}", e.extension_type),
        )),
        None => Ok(()),
    }
}

fn expect_empty(ext: &Extension) -> Result<(), Error> {
    if ext.data.is_empty() {
        Ok(())
    } else {
        Err(Error::decode_error(format!(
            "{:?} must be empty",
            ext.extension_type
        )))
    }
}

// ============================================================================
// ClientHello (server side)
// ============================================================================

/// What a ClientHello offered.
#[derive(Debug, Default)]
pub(crate) struct Offer {
    pub server_name: Option<String>,
    pub supported_versions: Option<Vec<ProtocolVersion>>,
    pub supported_groups: Option<Vec<NamedGroup>>,
    pub ec_point_formats: Option<Vec<u8>>,
    pub signature_schemes: Option<Vec<SignatureScheme>>,
    pub key_shares: Option<Vec<KeyShareEntry>>,
    pub psk_modes: Option<Vec<PskKeyExchangeMode>>,
    pub psks: Option<OfferedPsks>,
    pub cookie: Option<Buf>,
    pub renegotiation_info: Option<Buf>,
    pub extended_master_secret: bool,
    pub early_data: bool,
}

impl Offer {
    pub fn from_extensions(extensions: &[Extension]) -> Result<Offer, Error> {
        let mut offer = Offer::default();
        consume(CLIENT_HELLO, extensions, &mut offer)?;
        Ok(offer)
    }

    pub fn offers_psk_mode(&self, mode: PskKeyExchangeMode) -> bool {
        self.psk_modes.as_ref().is_some_and(|m| m.contains(&mode))
    }

    pub fn key_share(&self, group: NamedGroup) -> Option<&KeyShareEntry> {
        self.key_shares.as_ref()?.iter().find(|e| e.group == group)
    }
}

type OfferSpec = ExtensionSpec<Offer>;

pub(crate) static CLIENT_HELLO: &[ExtensionSpec<Offer>] = &[
    OfferSpec::new(ExtensionType::ServerName, |o, e| {
        o.server_name = Some(ServerNameExtension::from_extension(e)?.host_name);
        Ok(())
    }),
    OfferSpec::new(ExtensionType::SupportedVersions, |o, e| {
        o.supported_versions = Some(SupportedVersionsClientHello::from_extension(e)?.versions);
        Ok(())
    }),
    OfferSpec::new(ExtensionType::SupportedGroups, |o, e| {
        o.supported_groups = Some(SupportedGroupsExtension::from_extension(e)?.groups);
        Ok(())
    }),
    OfferSpec::new(ExtensionType::EcPointFormats, |o, e| {
        o.ec_point_formats = Some(EcPointFormatsExtension::from_extension(e)?.formats);
        Ok(())
    })
    .trade(|o| {
        let uncompressed = o
            .ec_point_formats
            .as_ref()
            .is_some_and(|f| f.contains(&ec_point_formats::UNCOMPRESSED));
        if uncompressed {
            Ok(())
        } else {
            Err(Error::illegal_parameter("uncompressed point format not offered"))
        }
    }),
    OfferSpec::new(ExtensionType::SignatureAlgorithms, |o, e| {
        o.signature_schemes = Some(SignatureAlgorithmsExtension::from_extension(e)?.schemes);
        Ok(())
    }),
    OfferSpec::new(ExtensionType::KeyShare, |o, e| {
        o.key_shares = Some(KeyShareClientHello::from_extension(e)?.entries);
        Ok(())
    })
    .trade(|o| {
        let groups = o.supported_groups.as_deref().unwrap_or(&[]);
        let shares = o.key_shares.as_deref().unwrap_or(&[]);
        match shares.iter().find(|s| !groups.contains(&s.group)) {
            Some(s) => Err(Error::illegal_parameter(format!(
                "key share for {:?} outside supported_groups",
                s.group
            ))),
            None => Ok(()),
        }
    }),
    OfferSpec::new(ExtensionType::PskKeyExchangeModes, |o, e| {
        o.psk_modes = Some(PskKeyExchangeModesExtension::from_extension(e)?.modes);
        Ok(())
    })
    .absence(|o| {
        if o.psks.is_some() {
            return Err(Error::handshake_failure(
                "pre_shared_key offered without psk_key_exchange_modes",
            ));
        }
        Ok(())
    }),
    OfferSpec::new(ExtensionType::PreSharedKey, |o, e| {
        o.psks = Some(OfferedPsks::from_extension(e)?);
        Ok(())
    }),
    OfferSpec::new(ExtensionType::Cookie, |o, e| {
        o.cookie = Some(CookieExtension::from_extension(e)?.cookie);
        Ok(())
    }),
    OfferSpec::new(ExtensionType::RenegotiationInfo, |o, e| {
        o.renegotiation_info =
            Some(RenegotiationInfoExtension::from_extension(e)?.renegotiated_connection);
        Ok(())
    }),
    OfferSpec::new(ExtensionType::ExtendedMasterSecret, |o, e| {
        expect_empty(e)?;
        o.extended_master_secret = true;
        Ok(())
    }),
    OfferSpec::new(ExtensionType::EarlyData, |o, e| {
        expect_empty(e)?;
        o.early_data = true;
        Ok(())
    }),
];

// ============================================================================
// ServerHello, HelloRetryRequest, EncryptedExtensions (client side)
// ============================================================================

/// What a server answered.
#[derive(Debug, Default)]
pub(crate) struct Answer {
    pub supported_version: Option<ProtocolVersion>,
    pub key_share: Option<KeyShareEntry>,
    pub retry_group: Option<NamedGroup>,
    pub selected_psk: Option<u16>,
    pub cookie: Option<Buf>,
    pub renegotiation_info: Option<Buf>,
    pub extended_master_secret: bool,
    pub ec_point_formats: Option<Vec<u8>>,
    pub server_name_ack: bool,
}

impl Answer {
    pub fn from_extensions(
        specs: &[ExtensionSpec<Answer>],
        extensions: &[Extension],
        offered: &[ExtensionType],
    ) -> Result<Answer, Error> {
        check_solicited(extensions, offered)?;
        let mut answer = Answer::default();
        consume(specs, extensions, &mut answer)?;
        Ok(answer)
    }
}

type AnswerSpec = ExtensionSpec<Answer>;

fn load_supported_version(a: &mut Answer, e: &Extension) -> Result<(), Error> {
    a.supported_version = Some(SupportedVersionsServerHello::from_extension(e)?.selected_version);
    Ok(())
}

fn load_cookie(a: &mut Answer, e: &Extension) -> Result<(), Error> {
    a.cookie = Some(CookieExtension::from_extension(e)?.cookie);
    Ok(())
}

fn load_server_name(a: &mut Answer, e: &Extension) -> Result<(), Error> {
    expect_empty(e)?;
    a.server_name_ack = true;
    Ok(())
}

pub(crate) static SERVER_HELLO: &[ExtensionSpec<Answer>] = &[
    AnswerSpec::new(ExtensionType::SupportedVersions, load_supported_version),
    AnswerSpec::new(ExtensionType::KeyShare, |a, e| {
        a.key_share = Some(KeyShareServerHello::from_extension(e)?.entry);
        Ok(())
    }),
    AnswerSpec::new(ExtensionType::PreSharedKey, |a, e| {
        a.selected_psk = Some(SelectedPsk::from_extension(e)?.0);
        Ok(())
    }),
    AnswerSpec::new(ExtensionType::RenegotiationInfo, |a, e| {
        a.renegotiation_info =
            Some(RenegotiationInfoExtension::from_extension(e)?.renegotiated_connection);
        Ok(())
    }),
    AnswerSpec::new(ExtensionType::ExtendedMasterSecret, |a, e| {
        expect_empty(e)?;
        a.extended_master_secret = true;
        Ok(())
    }),
    AnswerSpec::new(ExtensionType::EcPointFormats, |a, e| {
        a.ec_point_formats = Some(EcPointFormatsExtension::from_extension(e)?.formats);
        Ok(())
    }),
    AnswerSpec::new(ExtensionType::ServerName, load_server_name),
];

pub(crate) static HELLO_RETRY_REQUEST: &[ExtensionSpec<Answer>] = &[
    AnswerSpec::new(ExtensionType::SupportedVersions, load_supported_version).absence(|_| {
        Err(Error::fatal(
            AlertDescription::MissingExtension,
            "HelloRetryRequest without supported_versions",
        ))
    }),
    AnswerSpec::new(ExtensionType::KeyShare, |a, e| {
        a.retry_group = Some(KeyShareHelloRetryRequest::from_extension(e)?.selected_group);
        Ok(())
    }),
    AnswerSpec::new(ExtensionType::Cookie, load_cookie),
];

pub(crate) static ENCRYPTED_EXTENSIONS: &[ExtensionSpec<Answer>] = &[
    AnswerSpec::new(ExtensionType::ServerName, load_server_name),
    AnswerSpec::new(ExtensionType::SupportedGroups, |_, e| {
        // Server preference, informational only.
        SupportedGroupsExtension::from_extension(e)?;
        Ok(())
    }),
];

/// Extensions that must never appear in EncryptedExtensions.
pub(crate) fn check_encrypted_extensions(extensions: &[Extension]) -> Result<(), Error> {
    const FORBIDDEN: &[ExtensionType] = &[
        ExtensionType::SupportedVersions,
        ExtensionType::KeyShare,
        ExtensionType::PreSharedKey,
        ExtensionType::Cookie,
        ExtensionType::RenegotiationInfo,
        ExtensionType::ExtendedMasterSecret,
        ExtensionType::EcPointFormats,
    ];
    match extensions
        .iter()
        .find(|e| FORBIDDEN.contains(&e.extension_type))
    {
        Some(e) => Err(Error::illegal_parameter(format!(
            "{:?} in EncryptedExtensions",
            e.extension_type
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::extensions::PskIdentity;

    #[derive(Default)]
    struct Counter {
        loaded: usize,
        absent: usize,
        traded: usize,
    }

    static COUNTING: &[ExtensionSpec<Counter>] = &[ExtensionSpec::<Counter>::new(
        ExtensionType::Cookie,
        |c, _| {
            c.loaded += 1;
            Ok(())
        },
    )
    .absence(|c| {
        c.absent += 1;
        Ok(())
    })
    .trade(|c| {
        c.traded += 1;
        Ok(())
    })];

    fn cookie() -> Extension {
        CookieExtension {
            cookie: Buf::from_slice(b"c"),
        }
        .to_extension()
        .unwrap()
    }

    fn psk_offer() -> Extension {
        OfferedPsks {
            identities: vec![PskIdentity {
                identity: Buf::from_slice(b"ticket"),
                obfuscated_ticket_age: 0,
            }],
            binders: vec![Buf::from_slice(&[0; 32])],
        }
        .to_extension()
        .unwrap()
    }

    #[test]
    fn absence_runs_once_and_only_when_missing() {
        let mut c = Counter::default();
        consume(COUNTING, &[], &mut c).unwrap();
        assert_eq!((c.loaded, c.absent, c.traded), (0, 1, 0));

        let mut c = Counter::default();
        consume(COUNTING, &[cookie()], &mut c).unwrap();
        assert_eq!((c.loaded, c.absent, c.traded), (1, 0, 1));
    }

    #[test]
    fn duplicate_extension_rejected() {
        let err = Offer::from_extensions(&[cookie(), cookie()]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::IllegalParameter);
    }

    #[test]
    fn pre_shared_key_must_be_last() {
        let modes = PskKeyExchangeModesExtension {
            modes: vec![PskKeyExchangeMode::PskDheKe],
        }
        .to_extension()
        .unwrap();

        let err = Offer::from_extensions(&[psk_offer(), modes.clone()]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::IllegalParameter);

        let offer = Offer::from_extensions(&[modes, psk_offer()]).unwrap();
        assert!(offer.psks.is_some());
        assert!(offer.offers_psk_mode(PskKeyExchangeMode::PskDheKe));
    }

    #[test]
    fn psk_without_modes_is_handshake_failure() {
        let err = Offer::from_extensions(&[psk_offer()]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::HandshakeFailure);
        assert!(err.to_string().contains("psk_key_exchange_modes"));
    }

    #[test]
    fn key_share_outside_supported_groups() {
        let groups = SupportedGroupsExtension::new(&[NamedGroup::Secp256r1])
            .to_extension()
            .unwrap();
        let shares = KeyShareClientHello {
            entries: vec![KeyShareEntry::new(NamedGroup::X25519, &[9; 32])],
        }
        .to_extension()
        .unwrap();
        let err = Offer::from_extensions(&[groups, shares]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::IllegalParameter);
    }

    #[test]
    fn unsolicited_answer_rejected() {
        let ems = Extension::empty(ExtensionType::ExtendedMasterSecret);
        let err = Answer::from_extensions(SERVER_HELLO, &[ems.clone()], &[]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::UnsupportedExtension);

        let answer =
            Answer::from_extensions(SERVER_HELLO, &[ems], &[ExtensionType::ExtendedMasterSecret])
                .unwrap();
        assert!(answer.extended_master_secret);
    }

    #[test]
    fn non_empty_extended_master_secret_is_decode_error() {
        let ems = Extension::new(ExtensionType::ExtendedMasterSecret, Buf::from_slice(&[0]));
        let err = Offer::from_extensions(&[ems]).unwrap_err();
        assert_eq!(err.alert_description(), AlertDescription::DecodeError);
    }
}
