//! Test doubles for the device collaborators.

use crate::device::{
    Choice, EnrolError, Progress, Prompts, SaveError, SecretAccess, SecretError, SensitiveNode,
    SettingsStore, Transport, TransportError,
};

use std::collections::{BTreeMap, VecDeque};

use bitcoin::{bip32, secp256k1, Network};

/// A device secret derived from a one-byte seed, so every test signer gets
/// a distinct fingerprint.
pub struct TestSecret {
    master: bip32::Xpriv,
    secp: secp256k1::Secp256k1<secp256k1::All>,
}

impl TestSecret {
    pub fn new(seed: u8, network: Network) -> TestSecret {
        let master = bip32::Xpriv::new_master(network, &[seed; 32]).expect("valid seed length");
        TestSecret {
            master,
            secp: secp256k1::Secp256k1::new(),
        }
    }
}

impl SecretAccess for TestSecret {
    fn master_fingerprint(&self) -> bip32::Fingerprint {
        self.master.fingerprint(&self.secp)
    }

    fn derive_path(&self, path: &bip32::DerivationPath) -> Result<SensitiveNode, SecretError> {
        self.master
            .derive_priv(&self.secp, path)
            .map(SensitiveNode::new)
            .map_err(|e| SecretError(e.to_string()))
    }
}

/// An in-memory settings store with a switchable save failure. `staged` is
/// what `get` reads; `saved` only changes on a successful `save`.
#[derive(Default)]
pub struct FakeStore {
    staged: serde_json::Map<String, serde_json::Value>,
    pub saved: serde_json::Map<String, serde_json::Value>,
    pub fail_saves: bool,
}

impl SettingsStore for FakeStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.staged.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: serde_json::Value) {
        self.staged.insert(key.to_string(), value);
    }

    fn save(&mut self) -> Result<(), SaveError> {
        if self.fail_saves {
            return Err(SaveError("no space left".to_string()));
        }
        self.saved = self.staged.clone();
        Ok(())
    }
}

/// An in-memory transport: a flat namespace of named blobs plus a scripted
/// file picker.
#[derive(Default)]
pub struct MemTransport {
    pub files: BTreeMap<String, Vec<u8>>,
    pub picks: VecDeque<Option<String>>,
}

impl MemTransport {
    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.files.insert(name.to_string(), data);
    }
}

impl Transport for MemTransport {
    fn list(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, TransportError> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError(format!("no such file: {}", name)))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<String, TransportError> {
        // Deduplicate names the way a card slot picks fresh filenames.
        let mut candidate = name.to_string();
        let mut counter = 1;
        while self.files.contains_key(&candidate) {
            counter += 1;
            candidate = match name.rsplit_once('.') {
                Some((stem, ext)) => format!("{}-{}.{}", stem, counter, ext),
                None => format!("{}-{}", name, counter),
            };
        }
        self.files.insert(candidate.clone(), data.to_vec());
        Ok(candidate)
    }

    fn pick(&mut self, _prompt: &str, _suffix: &str) -> Result<Option<String>, TransportError> {
        Ok(self.picks.pop_front().unwrap_or(None))
    }
}

/// Prompts answered from pre-scripted queues. Running out of answers reads
/// as the user backing out.
#[derive(Default)]
pub struct ScriptedPrompts {
    pub answers: VecDeque<Choice>,
    pub numbers: VecDeque<Option<u32>>,
}

impl Prompts for ScriptedPrompts {
    fn story(&mut self, _title: Option<&str>, _msg: &str, _escape: &str) -> Choice {
        self.answers.pop_front().unwrap_or(Choice::Cancelled)
    }

    fn enter_number(&mut self, _msg: &str, _max: u32) -> Option<u32> {
        self.numbers.pop_front().unwrap_or(None)
    }
}

pub struct NullProgress;

impl Progress for NullProgress {
    fn progress(&mut self, _fraction: f32) {}
}

/// Records enrolments instead of registering wallets.
#[derive(Default)]
pub struct FakeEnrolment {
    /// (descriptor, name, session index) triples, in call order.
    pub enrolled: Vec<(String, String, usize)>,
}

impl crate::device::WalletEnrolment for FakeEnrolment {
    fn enrol(
        &mut self,
        descriptor: &str,
        name: &str,
        session_index: usize,
    ) -> Result<(), EnrolError> {
        self.enrolled
            .push((descriptor.to_string(), name.to_string(), session_index));
        Ok(())
    }
}
