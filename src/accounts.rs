//! Account operations consumed by the CLI: registration, face enrollment,
//! face verification and the administrative duplicate sweep.

use facegate_vision::{Signature, SIGNATURE_LEN};
use thiserror::Error;

use crate::identity;
use crate::matcher::{Candidate, MatchPolicy};
use crate::scanner::{self, DuplicateCluster};
use crate::storage::{DuplicateKey, IdentityRecord, RecordUpdate, ScanFields, UserStore};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("this face is already registered with username: {existing}")]
    DuplicateFace { existing: String },

    #[error("username {0} already exists")]
    UserExists(String),

    #[error("username {0} does not exist")]
    UnknownUser(String),

    #[error("invalid username {0:?}: at least 3 characters, no whitespace")]
    InvalidUsername(String),

    #[error("no face signature provided")]
    MissingSignature,

    #[error("signature must have {expected} values, got {len}", expected = SIGNATURE_LEN)]
    InvalidSignature { len: usize },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type AccountResult<T> = Result<T, AccountError>;

fn parse_signature(raw: Option<Vec<f32>>) -> AccountResult<Signature> {
    let raw = raw.ok_or(AccountError::MissingSignature)?;
    Signature::try_from(raw).map_err(|e| AccountError::InvalidSignature { len: e.0 })
}

pub struct Accounts<S> {
    store: S,
    policy: MatchPolicy,
}

impl<S: UserStore> Accounts<S> {
    pub fn new(store: S, policy: MatchPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// First other user whose stored face matches `candidate`.
    fn face_owner(
        &self,
        candidate: &Signature,
        except: Option<&str>,
    ) -> AccountResult<Option<String>> {
        let population = self.store.scan_all(ScanFields::WithSignatures)?;
        let owner = scanner::find_similar(&self.policy, candidate, &population)
            .into_iter()
            .map(|r| r.username.as_str())
            .find(|name| Some(*name) != except)
            .map(str::to_string);
        Ok(owner)
    }

    /// Check a username before capturing anything for it.
    pub fn check_new_username(&self, username: &str) -> AccountResult<()> {
        if !identity::is_valid_username(username) {
            return Err(AccountError::InvalidUsername(username.to_string()));
        }
        if self.store.exists(username)? {
            return Err(AccountError::UserExists(username.to_string()));
        }
        Ok(())
    }

    /// Create an account, optionally bound to a face.
    ///
    /// The duplicate check runs here, right before the write, not only when
    /// the face was captured. It is still a single read then write: two
    /// concurrent registrations of one face can both pass.
    pub fn register(&self, username: &str, signature: Option<Vec<f32>>) -> AccountResult<()> {
        self.check_new_username(username)?;

        let record = match signature {
            None => IdentityRecord::new(username),
            Some(raw) => {
                let sig = parse_signature(Some(raw))?;
                if let Some(existing) = self.face_owner(&sig, None)? {
                    return Err(AccountError::DuplicateFace { existing });
                }
                IdentityRecord::with_face(username, &sig)
            }
        };

        match self.store.put(record) {
            Ok(()) => {
                log::info!("registered {username}");
                Ok(())
            }
            Err(e) if e.downcast_ref::<DuplicateKey>().is_some() => {
                Err(AccountError::UserExists(username.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bind or replace the face of an existing account.
    pub fn enroll_face(&self, username: &str, signature: Option<Vec<f32>>) -> AccountResult<()> {
        let sig = parse_signature(signature)?;
        if !self.store.exists(username)? {
            return Err(AccountError::UnknownUser(username.to_string()));
        }
        if let Some(existing) = self.face_owner(&sig, Some(username))? {
            return Err(AccountError::DuplicateFace { existing });
        }
        if !self.store.update(username, RecordUpdate::BindFace(sig))? {
            // deleted between the checks and the write
            return Err(AccountError::UnknownUser(username.to_string()));
        }
        log::info!("face enrolled for {username}");
        Ok(())
    }

    /// Whether `signature` matches the face stored for `username`.
    ///
    /// False when the account has no face or its stored face is unreadable.
    pub fn verify_face(&self, username: &str, signature: Option<Vec<f32>>) -> AccountResult<bool> {
        let candidate = parse_signature(signature)?;
        let record = self
            .store
            .get(username)?
            .ok_or_else(|| AccountError::UnknownUser(username.to_string()))?;

        match record.signature() {
            None => {
                log::info!("{username} has no face registered");
                Ok(false)
            }
            Some(Err(e)) => {
                log::warn!("stored face for {username} is unusable: {e}");
                Ok(false)
            }
            Some(Ok(stored)) => Ok(self.policy.matches(
                &Candidate::new(&candidate),
                &stored,
                record.content_hash.as_ref(),
            )),
        }
    }

    pub fn find_duplicates_across_population(&self) -> AccountResult<Vec<DuplicateCluster>> {
        let population = self.store.scan_all(ScanFields::WithSignatures)?;
        log::info!("scanning {} account(s) for shared faces", population.len());
        Ok(scanner::partition_duplicates(&self.policy, &population))
    }

    pub fn has_face(&self, username: &str) -> AccountResult<bool> {
        Ok(self
            .store
            .get(username)?
            .map(|r| r.has_face)
            .unwrap_or(false))
    }

    /// Remove the face from an account, keeping the account itself.
    pub fn remove_face(&self, username: &str) -> AccountResult<bool> {
        Ok(self.store.update(username, RecordUpdate::ClearFace)?)
    }

    /// All accounts without their signature values.
    pub fn users(&self) -> AccountResult<Vec<IdentityRecord>> {
        Ok(self.store.scan_all(ScanFields::Summary)?)
    }

    pub fn delete(&self, username: &str) -> AccountResult<bool> {
        Ok(self.store.delete(username)?)
    }
}
