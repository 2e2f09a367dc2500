//! The I/O shell around the protocol engine.
//!
//! These flows wire the pure signer/coordinator rounds to the device
//! collaborators: prompts, progress display, payload transport, persistent
//! settings and wallet enrolment. Any cancelled prompt aborts the flow with
//! [`Outcome::Cancelled`] before anything is persisted; any error aborts the
//! whole round.

use crate::{
    coordinator,
    descriptors::AddressFormat,
    device::{Choice, Progress, Prompts, SecretAccess, SettingsStore, Transport, WalletEnrolment},
    settings::{self, CoordinatorSession},
    signer::{self, ScriptHint},
    token::{EncryptionType, Token},
    transport, BsmsError, MAX_SIGNERS,
};

use bitcoin::Network;

use std::str::FromStr;

/// How a flow ended when it did not error out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The user backed out; nothing was persisted.
    Cancelled,
}

/// The collaborators every flow needs.
pub struct Collaborators<'a> {
    pub prompts: &'a mut dyn Prompts,
    pub progress: &'a mut dyn Progress,
    pub transport: &'a mut dyn Transport,
    pub settings: &'a mut dyn SettingsStore,
}

/// Coordinator round 1: gather M, N, address format and encryption type,
/// generate the tokens, export them as `.token` files and record the
/// session.
pub fn coordinator_round1(c: &mut Collaborators) -> Result<Outcome, BsmsError> {
    let total = match c.prompts.enter_number("No. of signers? (N)", MAX_SIGNERS as u32) {
        Some(n) => n as usize,
        None => return Ok(Outcome::Cancelled),
    };
    let threshold = match c.prompts.enter_number("Threshold? (M)", MAX_SIGNERS as u32) {
        Some(m) => m as usize,
        None => return Ok(Outcome::Cancelled),
    };
    let addr_fmt = match c.prompts.story(
        None,
        "Choose address format. Default is P2WSH addresses. Press (1) for P2SH-P2WSH.",
        "1",
    ) {
        Choice::Confirmed => AddressFormat::P2wsh,
        Choice::Key('1') => AddressFormat::P2shP2wsh,
        _ => return Ok(Outcome::Cancelled),
    };
    let encryption = match c.prompts.story(
        None,
        "Choose encryption type. Press (1) for STANDARD encryption, (2) for EXTENDED, \
         and (3) for NO_ENCRYPTION.",
        "123",
    ) {
        Choice::Key('1') => EncryptionType::Standard,
        Choice::Key('2') => EncryptionType::Extended,
        Choice::Key('3') => EncryptionType::NoEncryption,
        _ => return Ok(Outcome::Cancelled),
    };

    let session = {
        let progress = &mut *c.progress;
        coordinator::round1(threshold, total, addr_fmt, encryption, &mut |f| {
            progress.progress(f)
        })?
    };

    let summary = format!(
        "{}Press OK to continue, otherwise X to cancel",
        session.summary()
    );
    if c.prompts.story(Some("SUMMARY"), &summary, "") != Choice::Confirmed {
        return Ok(Outcome::Cancelled);
    }

    let token_count = session.tokens.len();
    for (i, token) in session.tokens.iter().enumerate() {
        c.transport
            .write(&transport::token_filename(token), token.as_str().as_bytes())?;
        c.progress.progress((i + 1) as f32 / token_count as f32);
    }

    settings::add_coordinator(c.settings, session)?;
    log::info!("BSMS coordinator round 1 saved.");
    Ok(Outcome::Done)
}

// One file pick per signer, in token order.
fn manual_round1(
    c: &mut Collaborators,
    session: &CoordinatorSession,
    msg_prefix: &str,
) -> Result<Option<Vec<Vec<u8>>>, BsmsError> {
    let suffix = transport::payload_suffix(session.encryption);
    let total = session.total as usize;
    let mut payloads = Vec::with_capacity(total);
    for i in 0..total {
        let token = session.token_for(i);
        let prompt = format!(
            "{}Select {}. file containing signer round 1 data for token starting with {}. \
             File extension has to be \"{}\".",
            msg_prefix,
            i + 1,
            token.prefix(),
            suffix
        );
        let name = match c.transport.pick(&prompt, suffix)? {
            Some(name) => name,
            None => return Ok(None),
        };
        payloads.push(c.transport.read(&name)?);
    }
    Ok(Some(payloads))
}

/// Coordinator round 2: collect the N signer contributions (auto-collection
/// with a manual fallback), verify them, and export the descriptor template
/// artefacts.
pub fn coordinator_round2(
    c: &mut Collaborators,
    network: Network,
    session_index: usize,
) -> Result<Outcome, BsmsError> {
    let session = settings::coordinator_sessions(c.settings)?
        .get(session_index)
        .cloned()
        .ok_or_else(|| {
            BsmsError::Bounds(format!("No coordinator session at index {}.", session_index))
        })?;
    let suffix = transport::payload_suffix(session.encryption);

    let auto_prompt = format!(
        "Press OK to pick signer round 1 files manually, or press (1) to attempt \
         auto-collection. For auto-collection to succeed all filenames have to start with \
         'bsms_sr1' and end with extension '{}'.",
        suffix
    );
    let payloads = match c.prompts.story(None, &auto_prompt, "1") {
        Choice::Key('1') => match transport::collect_round1(c.transport, &session) {
            Ok(payloads) => payloads,
            Err(e) => {
                log::warn!("BSMS auto-collection failed: {}", e);
                match manual_round1(
                    c,
                    &session,
                    "Auto-collection failed. Defaulting to manual selection of files. ",
                )? {
                    Some(payloads) => payloads,
                    None => return Ok(Outcome::Cancelled),
                }
            }
        },
        Choice::Confirmed => match manual_round1(c, &session, "")? {
            Some(payloads) => payloads,
            None => return Ok(Outcome::Cancelled),
        },
        _ => return Ok(Outcome::Cancelled),
    };

    let round2 = {
        let progress = &mut *c.progress;
        coordinator::round2(&session, &payloads, network, &mut |f| {
            progress.progress(f)
        })?
    };

    for artefact in round2.artefacts(&session) {
        let name = transport::round2_filename(session.encryption, artefact.token.as_ref());
        c.transport.write(&name, &artefact.bytes)?;
    }
    log::info!("BSMS descriptor template file(s) written.");
    Ok(Outcome::Done)
}

/// Signer round 1: confirm the token, pick the derivation, contribute our
/// key, export the payload and record the session.
pub fn signer_round1(
    c: &mut Collaborators,
    secret: &dyn SecretAccess,
    network: Network,
    token_str: &str,
    description: Option<&str>,
) -> Result<Outcome, BsmsError> {
    let token = Token::from_str(token_str)?;
    let confirm = format!("You have entered token:\n{}\n\nIs token correct?", token);
    if c.prompts.story(None, &confirm, "") != Choice::Confirmed {
        return Ok(Outcome::Cancelled);
    }

    let (hint, af_str) = match c.prompts.story(
        None,
        "Choose address format for correct SLIP derivation path. Default is 'unknown' as \
         this information may not be known at this point in BSMS. Press (1) for P2WSH. \
         Press (2) for P2SH-P2WSH.",
        "12",
    ) {
        Choice::Confirmed => (ScriptHint::Unknown, ""),
        Choice::Key('1') => (ScriptHint::NativeSegwit, " P2WSH"),
        Choice::Key('2') => (ScriptHint::NestedSegwit, " P2SH-P2WSH"),
        _ => return Ok(Outcome::Cancelled),
    };
    let account = c.prompts.enter_number("Account Number:", 9999).unwrap_or(0);
    let description = match description {
        Some(description) => description.to_string(),
        None => format!("bsms signer{} account {}", af_str, account),
    };

    let contribution = {
        let progress = &mut *c.progress;
        signer::round1(secret, network, token, hint, account, &description, &mut |f| {
            progress.progress(f)
        })?
    };

    let filename = transport::round1_filename(&contribution.session.token);
    c.transport.write(&filename, &contribution.payload)?;
    settings::add_signer(c.settings, contribution.session.token)?;
    log::info!("BSMS signer round 1 saved.");
    Ok(Outcome::Done)
}

/// Signer round 2: read the descriptor template, verify it, enrol the
/// multisig wallet and only then consume the session.
pub fn signer_round2(
    c: &mut Collaborators,
    secret: &dyn SecretAccess,
    wallet: &mut dyn WalletEnrolment,
    network: Network,
    session_index: usize,
) -> Result<Outcome, BsmsError> {
    let session = settings::signer_sessions(c.settings)?
        .get(session_index)
        .cloned()
        .ok_or_else(|| {
            BsmsError::Bounds(format!("No signer session at index {}.", session_index))
        })?;
    let suffix = if session.token.is_sentinel() {
        transport::CLEAR_SUFFIX
    } else {
        transport::ENCRYPTED_SUFFIX
    };

    let prompt = format!(
        "Select file containing descriptor template from coordinator round 2. File \
         extension has to be \"{}\".",
        suffix
    );
    let name = match c.transport.pick(&prompt, suffix)? {
        Some(name) => name,
        None => return Ok(Outcome::Cancelled),
    };
    let payload = c.transport.read(&name)?;

    let enrolment = {
        let progress = &mut *c.progress;
        signer::round2(secret, network, &session.token, &payload, &mut |f| {
            progress.progress(f)
        })?
    };

    wallet
        .enrol(&enrolment.receive_descriptor, &enrolment.name, session_index)
        .map_err(BsmsError::Enrolment)?;
    settings::remove_signer(c.settings, session_index)?;
    log::info!("BSMS multisig wallet {} enrolled.", enrolment.name);
    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{FakeEnrolment, FakeStore, MemTransport, NullProgress, ScriptedPrompts, TestSecret};

    fn collaborators<'a>(
        prompts: &'a mut ScriptedPrompts,
        progress: &'a mut NullProgress,
        transport: &'a mut MemTransport,
        settings: &'a mut FakeStore,
    ) -> Collaborators<'a> {
        Collaborators {
            prompts,
            progress,
            transport,
            settings,
        }
    }

    #[test]
    fn coordinator_round1_cancellation_persists_nothing() {
        let mut prompts = ScriptedPrompts::default();
        prompts.numbers.push_back(Some(3));
        prompts.numbers.push_back(None); // backs out of the threshold entry
        let mut progress = NullProgress;
        let mut transport = MemTransport::default();
        let mut store = FakeStore::default();
        let mut c = collaborators(&mut prompts, &mut progress, &mut transport, &mut store);
        assert_eq!(coordinator_round1(&mut c).unwrap(), Outcome::Cancelled);
        assert!(settings::coordinator_sessions(&store).unwrap().is_empty());
    }

    #[test]
    fn coordinator_round1_standard_exports_token_file() {
        let mut prompts = ScriptedPrompts::default();
        prompts.numbers.push_back(Some(2)); // N
        prompts.numbers.push_back(Some(2)); // M
        prompts.answers.push_back(Choice::Confirmed); // p2wsh
        prompts.answers.push_back(Choice::Key('1')); // STANDARD
        prompts.answers.push_back(Choice::Confirmed); // summary
        let mut progress = NullProgress;
        let mut transport = MemTransport::default();
        let mut store = FakeStore::default();
        let mut c = collaborators(&mut prompts, &mut progress, &mut transport, &mut store);
        assert_eq!(coordinator_round1(&mut c).unwrap(), Outcome::Done);

        let sessions = settings::coordinator_sessions(&store).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].tokens.len(), 1);
        let token = &sessions[0].tokens[0];
        let file = transport.files.get(&transport::token_filename(token)).unwrap();
        assert_eq!(file, token.as_str().as_bytes());
    }

    // A whole 2-of-2 NO_ENCRYPTION setup through the flows, template picked
    // up from the coordinator's emitted file.
    #[test]
    fn full_clear_setup() {
        let network = Network::Testnet;
        let secrets = [
            TestSecret::new(0x51, network),
            TestSecret::new(0x52, network),
        ];
        let mut transport = MemTransport::default();
        let mut progress = NullProgress;

        // Each signer runs round 1 into the shared transport.
        for secret in &secrets {
            let mut prompts = ScriptedPrompts::default();
            prompts.answers.push_back(Choice::Confirmed); // token ok
            prompts.answers.push_back(Choice::Key('1')); // P2WSH path
            prompts.numbers.push_back(Some(0)); // account
            let mut store = FakeStore::default();
            let mut c = collaborators(&mut prompts, &mut progress, &mut transport, &mut store);
            assert_eq!(
                signer_round1(&mut c, secret, network, "00", None).unwrap(),
                Outcome::Done
            );
            assert_eq!(settings::signer_sessions(&store).unwrap().len(), 1);
        }

        // Coordinator round 1 then round 2 over the two emitted files.
        let mut coord_store = FakeStore::default();
        {
            let mut prompts = ScriptedPrompts::default();
            prompts.numbers.push_back(Some(2));
            prompts.numbers.push_back(Some(2));
            prompts.answers.push_back(Choice::Confirmed); // p2wsh
            prompts.answers.push_back(Choice::Key('3')); // NO_ENCRYPTION
            prompts.answers.push_back(Choice::Confirmed); // summary
            let mut c =
                collaborators(&mut prompts, &mut progress, &mut transport, &mut coord_store);
            assert_eq!(coordinator_round1(&mut c).unwrap(), Outcome::Done);
        }
        {
            let mut prompts = ScriptedPrompts::default();
            prompts.answers.push_back(Choice::Key('1')); // auto-collect
            let mut c =
                collaborators(&mut prompts, &mut progress, &mut transport, &mut coord_store);
            assert_eq!(coordinator_round2(&mut c, network, 0).unwrap(), Outcome::Done);
        }
        assert!(transport.files.contains_key("bsms_cr2.txt"));

        // Each signer verifies the template and enrols.
        for secret in &secrets {
            let mut store = FakeStore::default();
            settings::add_signer(&mut store, Token::none()).unwrap();
            let mut prompts = ScriptedPrompts::default();
            let mut wallet = FakeEnrolment::default();
            transport.picks.push_back(Some("bsms_cr2.txt".to_string()));
            let mut c = collaborators(&mut prompts, &mut progress, &mut transport, &mut store);
            assert_eq!(
                signer_round2(&mut c, secret, &mut wallet, network, 0).unwrap(),
                Outcome::Done
            );
            assert_eq!(wallet.enrolled.len(), 1);
            assert!(wallet.enrolled[0].1.starts_with("bsms_"));
            // The session was consumed.
            assert!(settings::signer_sessions(&store).unwrap().is_empty());
        }
    }

    #[test]
    fn signer_round2_cancelled_pick_keeps_session() {
        let network = Network::Testnet;
        let secret = TestSecret::new(0x53, network);
        let mut store = FakeStore::default();
        settings::add_signer(&mut store, Token::none()).unwrap();
        let mut prompts = ScriptedPrompts::default();
        let mut progress = NullProgress;
        let mut transport = MemTransport::default();
        transport.picks.push_back(None);
        let mut wallet = FakeEnrolment::default();
        let mut c = collaborators(&mut prompts, &mut progress, &mut transport, &mut store);
        assert_eq!(
            signer_round2(&mut c, &secret, &mut wallet, network, 0).unwrap(),
            Outcome::Cancelled
        );
        assert_eq!(settings::signer_sessions(&store).unwrap().len(), 1);
        assert!(wallet.enrolled.is_empty());
    }
}
