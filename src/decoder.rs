//! Process-wide setup of the DICOM decoding capability.
//!
//! The transfer syntax registry is populated at link time; [`initialize`]
//! probes it once, logs what is available and hands out a shared
//! [`DecoderCapabilities`]. Calling it again returns the same instance.

use std::sync::OnceLock;

use dicom::encoding::transfer_syntax::TransferSyntaxIndex;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use tracing::{info, warn};

static CAPABILITIES: OnceLock<DecoderCapabilities> = OnceLock::new();

const PROBED_SYNTAXES: [(&str, &str); 8] = [
    ("1.2.840.10008.1.2", "Implicit VR Little Endian"),
    ("1.2.840.10008.1.2.1", "Explicit VR Little Endian"),
    ("1.2.840.10008.1.2.2", "Explicit VR Big Endian"),
    ("1.2.840.10008.1.2.1.99", "Deflated Explicit VR Little Endian"),
    ("1.2.840.10008.1.2.5", "RLE Lossless"),
    ("1.2.840.10008.1.2.4.50", "JPEG Baseline"),
    ("1.2.840.10008.1.2.4.70", "JPEG Lossless SV1"),
    ("1.2.840.10008.1.2.4.90", "JPEG 2000 Lossless"),
];

const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

#[derive(Debug)]
pub struct DecoderCapabilities {
    available: Vec<&'static str>,
}

impl DecoderCapabilities {
    fn probe() -> Self {
        let available = PROBED_SYNTAXES
            .iter()
            .filter(|(uid, _)| Self::lookup(uid))
            .map(|(_, name)| *name)
            .collect();
        Self { available }
    }

    fn lookup(uid: &str) -> bool {
        TransferSyntaxRegistry
            .get(uid)
            .is_some_and(|ts| ts.is_fully_supported())
    }

    /// Whether files in the given transfer syntax can be decoded down to
    /// pixel data.
    pub fn can_decode(&self, transfer_syntax_uid: &str) -> bool {
        Self::lookup(transfer_syntax_uid.trim_end_matches(['\0', ' ']))
    }

    /// Names of the common transfer syntaxes found decodable at startup.
    pub fn available(&self) -> &[&'static str] {
        &self.available
    }
}

/// Register the decoder once for the whole process.
pub fn initialize() -> &'static DecoderCapabilities {
    CAPABILITIES.get_or_init(|| {
        let capabilities = DecoderCapabilities::probe();
        if !DecoderCapabilities::lookup(EXPLICIT_VR_LITTLE_ENDIAN) {
            warn!("Explicit VR Little Endian is not decodable, no series will be found");
        }
        info!(
            transfer_syntaxes = ?capabilities.available(),
            "DICOM decoder initialized"
        );
        capabilities
    })
}
