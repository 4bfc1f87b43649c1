//! HostConnect authentication handshake.
//!
//! Runs once per connection, immediately after accept:
//!
//! 1. Server sends `Authenticate` followed by a 32-byte random challenge.
//! 2. Host answers `Authenticate`, a u16 block length and the response block.
//! 3. Server resolves the host's identity by public key, verifies the
//!    challenge signature for permanent hosts, and persists the record.
//!
//! The response travels as one length-prefixed block so hosts can append
//! fields without breaking older servers: fields past the ones listed in
//! [`AuthResponse`] are ignored.
//!
//! Every rejection carries a named [`AuthFailure`]. Nothing is retried and
//! nothing is persisted unless every check passed.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, instrument};

use crate::core::command::{AuthenticationType, Command};
use crate::core::frame::{BlockReader, FrameBuilder, FrameReader, FrameWriter};
use crate::error::{AuthFailure, Result};
use crate::store::{
    Computer, ComputerChange, ComputerStore, ComputerUpdate, GroupId, NewComputer,
};
use crate::utils::crypto::{generate_challenge, SignatureVerifier};
use crate::utils::time::current_timestamp_ms;

/// Parsed authentication response block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub auth_type: AuthenticationType,
    /// Provisioning key baked into the host download. Required, not checked.
    pub security_key: String,
    pub signature: Bytes,
    pub public_key: String,
    pub name: String,
    pub app_version: String,
    pub os_version: String,
}

impl AuthResponse {
    /// Parse the response block, enforcing the required-length rules.
    pub fn parse(block: Bytes) -> Result<Self> {
        let mut block = BlockReader::new(block);

        let auth_type = AuthenticationType::from_byte(block.read_u8()?);

        let security_key_len = block.read_u8()? as usize;
        if security_key_len == 0 {
            return Err(AuthFailure::SecurityKeyLength.into());
        }
        let security_key = block.read_utf8(security_key_len, "security_key")?;

        let signature_len = block.read_u16()? as usize;
        if signature_len == 0 && auth_type.requires_signature() {
            return Err(AuthFailure::SignatureLength.into());
        }
        let signature = block.read_bytes(signature_len)?;

        let public_key_len = block.read_u16()? as usize;
        if public_key_len == 0 && auth_type.requires_signature() {
            return Err(AuthFailure::PublicKeyLength.into());
        }
        let public_key = block.read_utf8(public_key_len, "public_key")?;

        let name_len = block.read_u8()? as usize;
        if name_len == 0 {
            return Err(AuthFailure::NameLength.into());
        }
        let name = block.read_utf8(name_len, "name")?;

        let app_version_len = block.read_u8()? as usize;
        let app_version = block.read_utf8(app_version_len, "app_version")?;

        let os_version_len = block.read_u8()? as usize;
        let os_version = block.read_utf8(os_version_len, "os_version")?;

        if block.remaining() > 0 {
            debug!(extra = block.remaining(), "Ignoring trailing auth response fields");
        }

        Ok(Self {
            auth_type,
            security_key,
            signature,
            public_key,
            name,
            app_version,
            os_version,
        })
    }

    /// Encode as the host would send it, block length prefix included.
    pub fn encode(&self) -> Result<Bytes> {
        let mut block = FrameBuilder::new();
        block.put_u8(self.auth_type.as_byte());
        block.put_utf8_u8("security_key", &self.security_key)?;
        block.put_bytes_u16("signature", &self.signature)?;
        block.put_utf8_u16("public_key", &self.public_key)?;
        block.put_utf8_u8("name", &self.name)?;
        block.put_utf8_u8("app_version", &self.app_version)?;
        block.put_utf8_u8("os_version", &self.os_version)?;
        let block = block.finish();

        let mut frame = FrameBuilder::command(Command::Authenticate);
        frame.put_bytes_u16("auth_response", &block)?;
        Ok(frame.finish())
    }
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedHost {
    /// The record as persisted, with its storage-assigned ID.
    pub computer: Computer,
    /// First time this public key was seen.
    pub is_new: bool,
    pub auth_type: AuthenticationType,
}

/// Work out what to ask the store for.
///
/// A known computer keeps its name; only the version fields are refreshed.
fn plan_change(existing: Option<&Computer>, response: &AuthResponse) -> Result<ComputerChange> {
    Ok(match existing {
        Some(computer) => ComputerChange::Update(ComputerUpdate {
            id: computer.id,
            app_version: response.app_version.clone(),
            os_version: response.os_version.clone(),
        }),
        None => ComputerChange::Create(NewComputer {
            public_key: response.public_key.clone(),
            name: response.name.clone(),
            app_version: response.app_version.clone(),
            os_version: response.os_version.clone(),
            last_disconnect_ms: current_timestamp_ms()?,
        }),
    })
}

/// Run the server side of the handshake.
///
/// # Errors
/// `ProtocolError::Handshake` with a named reason for every rejection,
/// transport errors if the host disconnects or stalls, and
/// `ProtocolError::Storage` if the identity lookup itself fails.
#[instrument(skip_all)]
pub async fn authenticate<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    store: &dyn ComputerStore,
    verifier: &dyn SignatureVerifier,
    default_group: GroupId,
) -> Result<AuthenticatedHost>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let challenge = generate_challenge()?;
    let mut opening = FrameBuilder::command(Command::Authenticate);
    opening.put_raw(&challenge);
    writer.write_frame(&opening.finish()).await?;

    let command = reader.read_u8().await?;
    if Command::from_byte(command) != Some(Command::Authenticate) {
        return Err(AuthFailure::AuthResponseCommand.into());
    }

    let block_len = reader.read_u16().await?;
    if block_len == 0 {
        return Err(AuthFailure::AuthResponseLength.into());
    }
    let block = reader.read_exact_bytes(block_len as usize).await?;
    let response = AuthResponse::parse(block)?;
    debug!(
        auth_type = ?response.auth_type,
        security_key_len = response.security_key.len(),
        "Parsed auth response"
    );

    let existing = store.find_by_public_key(&response.public_key)?;
    match &existing {
        Some(computer) => info!(
            computer_id = computer.id,
            name = %computer.name,
            "Existing computer is reconnecting"
        ),
        None => info!(name = %response.name, "New computer"),
    }

    if response.auth_type.requires_signature() {
        let public_key = existing
            .as_ref()
            .map_or(response.public_key.as_str(), |c| c.public_key.as_str());
        if !verifier.verify(&challenge, public_key, &response.signature) {
            return Err(AuthFailure::SignatureVerificationFailed.into());
        }
    }

    let is_new = existing.is_none();
    let change = plan_change(existing.as_ref(), &response)?;
    let computer = store
        .persist_computer(&change, default_group)
        .map_err(|e| {
            debug!(error = %e, "Failed to persist computer");
            AuthFailure::FailedToAddComputer
        })?;

    Ok(AuthenticatedHost {
        computer,
        is_new,
        auth_type: response.auth_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    fn permanent() -> AuthResponse {
        AuthResponse {
            auth_type: AuthenticationType::PermanentHost,
            security_key: "abc".into(),
            signature: Bytes::from_static(&[9u8; 64]),
            public_key: "cHVibGljLWtleQ==".into(),
            name: "Agent1".into(),
            app_version: "1.0".into(),
            os_version: "Linux".into(),
        }
    }

    /// Strip the opcode and u16 length the encoder prepends.
    fn block_of(response: &AuthResponse) -> Bytes {
        response.encode().unwrap().slice(3..)
    }

    fn reason(err: ProtocolError) -> AuthFailure {
        err.auth_failure().expect("expected a handshake rejection")
    }

    #[test]
    fn test_parse_full_block() {
        let parsed = AuthResponse::parse(block_of(&permanent())).unwrap();
        assert_eq!(parsed, permanent());
    }

    #[test]
    fn test_trailing_fields_ignored() {
        let mut raw = block_of(&permanent()).to_vec();
        raw.extend_from_slice(b"future-field");
        let parsed = AuthResponse::parse(Bytes::from(raw)).unwrap();
        assert_eq!(parsed.os_version, "Linux");
    }

    #[test]
    fn test_required_lengths() {
        let mut r = permanent();
        r.security_key.clear();
        assert_eq!(
            reason(AuthResponse::parse(block_of(&r)).unwrap_err()),
            AuthFailure::SecurityKeyLength
        );

        let mut r = permanent();
        r.signature = Bytes::new();
        assert_eq!(
            reason(AuthResponse::parse(block_of(&r)).unwrap_err()),
            AuthFailure::SignatureLength
        );

        let mut r = permanent();
        r.public_key.clear();
        assert_eq!(
            reason(AuthResponse::parse(block_of(&r)).unwrap_err()),
            AuthFailure::PublicKeyLength
        );

        let mut r = permanent();
        r.name.clear();
        assert_eq!(
            reason(AuthResponse::parse(block_of(&r)).unwrap_err()),
            AuthFailure::NameLength
        );
    }

    #[test]
    fn test_temporary_host_may_omit_key_material() {
        let mut r = permanent();
        r.auth_type = AuthenticationType::TemporaryHost;
        r.signature = Bytes::new();
        r.public_key.clear();
        r.app_version.clear();
        let parsed = AuthResponse::parse(block_of(&r)).unwrap();
        assert!(parsed.public_key.is_empty());
        assert!(parsed.app_version.is_empty());

        r.name.clear();
        assert_eq!(
            reason(AuthResponse::parse(block_of(&r)).unwrap_err()),
            AuthFailure::NameLength
        );
    }

    #[test]
    fn test_short_block_is_truncated() {
        let block = block_of(&permanent());
        let cut = block.slice(..block.len() - 3);
        assert_eq!(
            reason(AuthResponse::parse(cut).unwrap_err()),
            AuthFailure::AuthResponseTruncated
        );
    }

    #[test]
    fn test_plan_keeps_existing_name() {
        let existing = Computer {
            id: 7,
            public_key: "k".into(),
            name: "Original".into(),
            app_version: "0.9".into(),
            os_version: "Linux".into(),
            last_disconnect_ms: 1,
        };
        let change = plan_change(Some(&existing), &permanent()).unwrap();
        assert_eq!(
            change,
            ComputerChange::Update(ComputerUpdate {
                id: 7,
                app_version: "1.0".into(),
                os_version: "Linux".into(),
            })
        );

        match plan_change(None, &permanent()).unwrap() {
            ComputerChange::Create(new) => {
                assert_eq!(new.name, "Agent1");
                assert!(new.last_disconnect_ms > 0);
            }
            other => panic!("expected create, got {other:?}"),
        }
    }
}
