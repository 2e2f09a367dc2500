//! The multisig descriptor template exchanged in coordinator round 2.
//!
//! BSMS restricts descriptors to `sortedmulti` inside `wsh(...)` (native
//! segwit) or `sh(wsh(...))` (nested), every key a multipath xpub over the
//! external/internal pair. On the wire the `<0;1>/*` wildcard of every key
//! is collapsed to the literal `/**` and a BIP-380 checksum is appended over
//! the collapsed string.

use crate::MAX_SIGNERS;

use miniscript::{
    descriptor::{
        self, checksum, DerivPaths, DescriptorMultiXKey, DescriptorPublicKey, ShInner, Wildcard,
        WshInner,
    },
    ForEachKey,
};

use bitcoin::{bip32, Address, Network};

use std::{collections::HashSet, error, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod keys;
pub use keys::*;

/// The wire form of the multipath wildcard in a descriptor template.
const COLLAPSED_WILDCARD: &str = "/**";
const MULTIPATH_WILDCARD: &str = "/<0;1>/*";

#[derive(Debug)]
pub enum DescriptorError {
    Miniscript(miniscript::Error),
    Key(KeyError),
    /// Missing or invalid BIP-380 checksum.
    Checksum(String),
    /// Not a sortedmulti inside wsh() or sh(wsh()).
    NotMultisig,
    /// M of N outside 1 <= M <= N <= 15, N >= 2.
    Threshold { m: usize, n: usize },
    /// The same extended key appears twice.
    DuplicateKey(String),
    /// Keys not restricted to the external/internal unhardened pair.
    WrongPaths,
    /// A key without a master origin cannot be attributed to a signer.
    MissingOrigin,
    Conversion(descriptor::ConversionError),
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Miniscript(e) => write!(f, "Miniscript error: '{}'.", e),
            Self::Key(e) => write!(f, "{}", e),
            Self::Checksum(e) => write!(f, "Descriptor checksum error: '{}'.", e),
            Self::NotMultisig => write!(
                f,
                "Descriptor must be sortedmulti under wsh() or sh(wsh())."
            ),
            Self::Threshold { m, n } => write!(
                f,
                "Invalid multisig bounds: {} of {}. Need 1 <= M <= N <= {} and N >= 2.",
                m, n, MAX_SIGNERS
            ),
            Self::DuplicateKey(key) => write!(f, "Duplicate signer key: {}.", key),
            Self::WrongPaths => write!(
                f,
                "Descriptor keys must use the '<0;1>/*' derivation path pair."
            ),
            Self::MissingOrigin => write!(f, "Descriptor key without a key origin."),
            Self::Conversion(e) => write!(f, "Error deriving descriptor: '{}'.", e),
        }
    }
}

impl error::Error for DescriptorError {}

impl From<KeyError> for DescriptorError {
    fn from(e: KeyError) -> DescriptorError {
        DescriptorError::Key(e)
    }
}

/// The two script layouts BSMS can set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFormat {
    #[serde(rename = "p2wsh")]
    P2wsh,
    #[serde(rename = "p2sh-p2wsh")]
    P2shP2wsh,
}

impl fmt::Display for AddressFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::P2wsh => write!(f, "p2wsh"),
            Self::P2shP2wsh => write!(f, "p2sh-p2wsh"),
        }
    }
}

/// An N-of-M sorted multisig descriptor over the signers' multipath xpubs,
/// keys kept in the order contributions were received.
#[derive(Debug, Clone)]
pub struct MultisigDescriptor {
    threshold: usize,
    keys: Vec<SignerKey>,
    addr_fmt: AddressFormat,
    desc: descriptor::Descriptor<DescriptorPublicKey>,
}

fn branch_paths() -> Vec<bip32::DerivationPath> {
    vec![
        vec![bip32::ChildNumber::Normal { index: 0 }].into(),
        vec![bip32::ChildNumber::Normal { index: 1 }].into(),
    ]
}

fn multipath_key(key: &SignerKey) -> DescriptorPublicKey {
    DescriptorPublicKey::MultiXPub(DescriptorMultiXKey {
        origin: Some((key.fingerprint, key.derivation_path.clone())),
        xkey: key.xpub,
        derivation_paths: DerivPaths::new(branch_paths()).expect("two derivation paths"),
        wildcard: Wildcard::Unhardened,
    })
}

fn check_bounds(threshold: usize, keys: &[SignerKey]) -> Result<(), DescriptorError> {
    let n = keys.len();
    if threshold < 1 || threshold > n || n < 2 || n > MAX_SIGNERS {
        return Err(DescriptorError::Threshold { m: threshold, n });
    }
    let mut seen = HashSet::with_capacity(n);
    for key in keys {
        if !seen.insert(key.xpub) {
            return Err(DescriptorError::DuplicateKey(key.xpub.to_string()));
        }
    }
    Ok(())
}

impl MultisigDescriptor {
    pub fn new(
        threshold: usize,
        keys: Vec<SignerKey>,
        addr_fmt: AddressFormat,
    ) -> Result<MultisigDescriptor, DescriptorError> {
        check_bounds(threshold, &keys)?;
        let pks: Vec<DescriptorPublicKey> = keys.iter().map(multipath_key).collect();
        let desc = match addr_fmt {
            AddressFormat::P2wsh => {
                descriptor::Descriptor::new_wsh_sortedmulti(threshold, pks)
            }
            AddressFormat::P2shP2wsh => {
                descriptor::Descriptor::new_sh_wsh_sortedmulti(threshold, pks)
            }
        }
        .map_err(DescriptorError::Miniscript)?;
        Ok(MultisigDescriptor {
            threshold,
            keys,
            addr_fmt,
            desc,
        })
    }

    /// Parse a descriptor template line: verify the checksum as transmitted
    /// (appending one if absent), expand the collapsed wildcard back to the
    /// multipath pair, and validate the descriptor's shape for this network.
    pub fn from_template(line: &str, network: Network) -> Result<MultisigDescriptor, DescriptorError> {
        let body = match line.rsplit_once('#') {
            Some((body, carried)) => {
                let computed = checksum::desc_checksum(body)
                    .map_err(|e| DescriptorError::Checksum(e.to_string()))?;
                if carried != computed {
                    return Err(DescriptorError::Checksum(format!(
                        "expected {}, got {}",
                        computed, carried
                    )));
                }
                body
            }
            None => line,
        };
        let expanded = body.replace(COLLAPSED_WILDCARD, MULTIPATH_WILDCARD);
        // Sanity checks are not always performed when calling `Descriptor::from_str`, so we
        // perform them explicitly. See https://github.com/rust-bitcoin/rust-miniscript/issues/734.
        let desc = descriptor::Descriptor::<DescriptorPublicKey>::from_str(&expanded)
            .and_then(|desc| desc.sanity_check().map(|_| desc))
            .map_err(DescriptorError::Miniscript)?;
        Self::from_descriptor(desc, network)
    }

    fn from_descriptor(
        desc: descriptor::Descriptor<DescriptorPublicKey>,
        network: Network,
    ) -> Result<MultisigDescriptor, DescriptorError> {
        let (addr_fmt, sorted_multi) = match &desc {
            descriptor::Descriptor::Wsh(wsh) => match wsh.as_inner() {
                WshInner::SortedMulti(smv) => (AddressFormat::P2wsh, smv),
                _ => return Err(DescriptorError::NotMultisig),
            },
            descriptor::Descriptor::Sh(sh) => match sh.as_inner() {
                ShInner::Wsh(wsh) => match wsh.as_inner() {
                    WshInner::SortedMulti(smv) => (AddressFormat::P2shP2wsh, smv),
                    _ => return Err(DescriptorError::NotMultisig),
                },
                _ => return Err(DescriptorError::NotMultisig),
            },
            _ => return Err(DescriptorError::NotMultisig),
        };

        let threshold = sorted_multi.k();
        let expected_paths = branch_paths();
        let mut keys = Vec::with_capacity(sorted_multi.pks().len());
        for pk in sorted_multi.pks() {
            let xpub = match pk {
                DescriptorPublicKey::MultiXPub(xpub) => xpub,
                _ => return Err(DescriptorError::WrongPaths),
            };
            if xpub.derivation_paths.paths() != &expected_paths
                || xpub.wildcard != Wildcard::Unhardened
            {
                return Err(DescriptorError::WrongPaths);
            }
            if xpub.xkey.network != network.into() {
                return Err(DescriptorError::Key(KeyError::Network {
                    expected: expected_key_prefix(network),
                    got: xpub.xkey.to_string().chars().take(4).collect(),
                }));
            }
            let (fingerprint, derivation_path) =
                xpub.origin.clone().ok_or(DescriptorError::MissingOrigin)?;
            keys.push(SignerKey {
                fingerprint,
                derivation_path,
                xpub: xpub.xkey,
            });
        }
        check_bounds(threshold, &keys)?;

        Ok(MultisigDescriptor {
            threshold,
            keys,
            addr_fmt,
            desc,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The signers' keys, in the order contributions were received.
    pub fn keys(&self) -> &[SignerKey] {
        &self.keys
    }

    pub fn address_format(&self) -> AddressFormat {
        self.addr_fmt
    }

    /// Whether a key matching this fingerprint is part of this descriptor.
    pub fn contains_fingerprint(&self, fg: bip32::Fingerprint) -> bool {
        self.desc.for_any_key(|k| k.master_fingerprint() == fg)
    }

    /// The wire form: multipath wildcards collapsed to "/**", with a fresh
    /// BIP-380 checksum computed over the collapsed string.
    pub fn template(&self) -> String {
        let full = self.desc.to_string();
        let body = full.split('#').next().expect("split always yields one");
        let collapsed = body.replace(MULTIPATH_WILDCARD, COLLAPSED_WILDCARD);
        let ck = checksum::desc_checksum(&collapsed).expect("valid descriptor characters");
        format!("{}#{}", collapsed, ck)
    }

    /// The single-branch receive descriptor ("/0/*" on every key), with its
    /// checksum. This is what gets enrolled as a watch-only wallet.
    pub fn receive_descriptor(&self) -> Result<String, DescriptorError> {
        let receive = self
            .desc
            .clone()
            .into_single_descriptors()
            .map_err(DescriptorError::Miniscript)?
            .into_iter()
            .next()
            .expect("both branches are always present");
        Ok(receive.to_string())
    }

    /// The agreement address: the first receive address, derived at external
    /// index 0.
    pub fn first_address(&self, network: Network) -> Result<Address, DescriptorError> {
        let receive = self
            .desc
            .clone()
            .into_single_descriptors()
            .map_err(DescriptorError::Miniscript)?
            .into_iter()
            .next()
            .expect("both branches are always present");
        receive
            .at_derivation_index(0)
            .map_err(DescriptorError::Conversion)?
            .address(network)
            .map_err(DescriptorError::Miniscript)
    }
}

impl fmt::Display for MultisigDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.desc)
    }
}
