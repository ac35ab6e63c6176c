//! Typed extension payloads.
//!
//! Each payload knows its [`ExtensionType`] and converts to and from the raw
//! [`Extension`] carried in a hello. Conversion from a raw extension rejects
//! trailing bytes.

pub mod cookie;
pub mod ec_point_formats;
pub mod key_share;
pub mod psk;
pub mod renegotiation_info;
pub mod server_name;
pub mod signature_algorithms;
pub mod supported_groups;
pub mod supported_versions;

pub use cookie::CookieExtension;
pub use ec_point_formats::EcPointFormatsExtension;
pub use key_share::{KeyShareClientHello, KeyShareEntry, KeyShareHelloRetryRequest};
pub use key_share::KeyShareServerHello;
pub use psk::{OfferedPsks, PskIdentity, PskKeyExchangeModesExtension, SelectedPsk};
pub use renegotiation_info::RenegotiationInfoExtension;
pub use server_name::ServerNameExtension;
pub use signature_algorithms::SignatureAlgorithmsExtension;
pub use supported_groups::SupportedGroupsExtension;
pub use supported_versions::{SupportedVersionsClientHello, SupportedVersionsServerHello};

use nom::IResult;

use super::extension::{Extension, ExtensionType};
use crate::buffer::Buf;
use crate::codec::{self, CodecError};

pub trait ExtensionData: Sized {
    const TYPE: ExtensionType;

    fn parse(input: &[u8]) -> IResult<&[u8], Self>;

    fn serialize(&self, output: &mut Buf) -> Result<(), CodecError>;

    fn to_extension(&self) -> Result<Extension, CodecError> {
        let mut data = Buf::new();
        self.serialize(&mut data)?;
        Ok(Extension::new(Self::TYPE, data))
    }

    fn from_extension(extension: &Extension) -> Result<Self, CodecError> {
        codec::parse_all(&extension.data, Self::parse)
    }
}
