use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Arc, Mutex};

/// Membership status within an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Active,
    Invited,
    Suspended,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Invited => "invited",
            MemberStatus::Suspended => "suspended",
        }
    }

    /// Parse a status string; unknown values are treated as suspended.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "active" => MemberStatus::Active,
            "invited" => MemberStatus::Invited,
            _ => MemberStatus::Suspended,
        }
    }
}

/// User information
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserInfo {
    /// Name shown to collaborators; falls back to the email address.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// Session information
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A live (not soft-deleted) document
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: String,
    pub organization_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Stored CRDT state of a document
#[derive(Debug, Clone)]
pub struct DocumentStateRow {
    pub state: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for identity, membership and document state
pub struct DocRepo {
    conn: Arc<Mutex<Connection>>,
}

impl DocRepo {
    /// Create a new DocRepo with the given connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    // ===== User operations =====

    /// Create a user and return its id
    pub fn create_user(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<String, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let user_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO users (id, email, display_name, created_at) VALUES (?, ?, ?, ?)",
            params![user_id, email, display_name, now],
        )?;

        Ok(user_id)
    }

    /// Get a user by ID
    pub fn get_user(&self, user_id: &str) -> Result<Option<UserInfo>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, email, display_name, created_at FROM users WHERE id = ?",
            [user_id],
            |row| {
                Ok(UserInfo {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    display_name: row.get(2)?,
                    created_at: timestamp_to_datetime(row.get(3)?),
                })
            },
        )
        .optional()
    }

    // ===== Session operations =====

    /// Create an auth session and return its token
    pub fn create_session(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let token = generate_secure_token();
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO auth_sessions (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
            params![token, user_id, expires_at.timestamp(), now],
        )?;

        Ok(token)
    }

    /// Validate a session token (returns session info if valid)
    pub fn validate_session(&self, token: &str) -> Result<Option<SessionInfo>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();

        conn.query_row(
            "SELECT token, user_id, expires_at, created_at
             FROM auth_sessions WHERE token = ? AND expires_at > ?",
            params![token, now],
            |row| {
                Ok(SessionInfo {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: timestamp_to_datetime(row.get(2)?),
                    created_at: timestamp_to_datetime(row.get(3)?),
                })
            },
        )
        .optional()
    }

    /// Delete a session
    pub fn delete_session(&self, token: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM auth_sessions WHERE token = ?", [token])?;
        Ok(())
    }

    /// Clean up expired sessions
    pub fn cleanup_expired_sessions(&self) -> Result<usize, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();
        let deleted = conn.execute("DELETE FROM auth_sessions WHERE expires_at < ?", [now])?;
        Ok(deleted)
    }

    // ===== Organization operations =====

    pub fn create_organization(&self, name: &str) -> Result<String, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let organization_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO organizations (id, name, created_at) VALUES (?, ?, ?)",
            params![organization_id, name, Utc::now().timestamp()],
        )?;
        Ok(organization_id)
    }

    /// Add a member, or update the status of an existing one
    pub fn set_member(
        &self,
        organization_id: &str,
        user_id: &str,
        status: MemberStatus,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO organization_members (organization_id, user_id, status, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(organization_id, user_id) DO UPDATE SET status = excluded.status",
            params![
                organization_id,
                user_id,
                status.as_str(),
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn member_status(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Option<MemberStatus>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM organization_members WHERE organization_id = ? AND user_id = ?",
                params![organization_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.map(|s| MemberStatus::from_str_lossy(&s)))
    }

    /// Whether the user is an active member of the organization
    pub fn is_active_member(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<bool, rusqlite::Error> {
        Ok(self.member_status(organization_id, user_id)? == Some(MemberStatus::Active))
    }

    // ===== Document operations =====

    pub fn create_document(
        &self,
        organization_id: &str,
        title: &str,
    ) -> Result<String, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let document_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO documents (id, organization_id, title, created_at) VALUES (?, ?, ?, ?)",
            params![document_id, organization_id, title, Utc::now().timestamp()],
        )?;
        Ok(document_id)
    }

    /// Get a document unless it has been soft-deleted
    pub fn get_document(&self, document_id: &str) -> Result<Option<DocumentInfo>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, organization_id, title, created_at
             FROM documents WHERE id = ? AND deleted_at IS NULL",
            [document_id],
            |row| {
                Ok(DocumentInfo {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    title: row.get(2)?,
                    created_at: timestamp_to_datetime(row.get(3)?),
                })
            },
        )
        .optional()
    }

    /// Soft-delete a document. Returns false if it was already gone.
    pub fn soft_delete_document(&self, document_id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE documents SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
            params![Utc::now().timestamp(), document_id],
        )?;
        Ok(changed > 0)
    }

    // ===== Document state operations =====

    pub fn load_document_state(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentStateRow>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT state, updated_at FROM document_states WHERE document_id = ?",
            [document_id],
            |row| {
                Ok(DocumentStateRow {
                    state: row.get(0)?,
                    updated_at: timestamp_to_datetime(row.get(1)?),
                })
            },
        )
        .optional()
    }

    /// Replace the stored state of a document
    pub fn save_document_state(&self, document_id: &str, state: &[u8]) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO document_states (document_id, state, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(document_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![document_id, state, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

/// Generate a cryptographically secure random token
fn generate_secure_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen()).collect();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;

    fn setup_test_db() -> DocRepo {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        DocRepo::new(conn)
    }

    #[test]
    fn test_session_validation_and_expiry() {
        let repo = setup_test_db();
        let user_id = repo.create_user("a@example.com", None).unwrap();

        let token = repo
            .create_session(&user_id, Utc::now() + chrono::Duration::days(1))
            .unwrap();
        let session = repo.validate_session(&token).unwrap().unwrap();
        assert_eq!(session.user_id, user_id);

        let expired = repo
            .create_session(&user_id, Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert!(repo.validate_session(&expired).unwrap().is_none());
        assert!(repo.validate_session("bogus").unwrap().is_none());

        assert_eq!(repo.cleanup_expired_sessions().unwrap(), 1);
        assert!(repo.validate_session(&token).unwrap().is_some());

        repo.delete_session(&token).unwrap();
        assert!(repo.validate_session(&token).unwrap().is_none());
    }

    #[test]
    fn test_membership_status() {
        let repo = setup_test_db();
        let user_id = repo.create_user("b@example.com", Some("Bea")).unwrap();
        let org = repo.create_organization("Acme").unwrap();

        assert!(!repo.is_active_member(&org, &user_id).unwrap());
        repo.set_member(&org, &user_id, MemberStatus::Invited).unwrap();
        assert!(!repo.is_active_member(&org, &user_id).unwrap());
        repo.set_member(&org, &user_id, MemberStatus::Active).unwrap();
        assert!(repo.is_active_member(&org, &user_id).unwrap());
        repo.set_member(&org, &user_id, MemberStatus::Suspended).unwrap();
        assert_eq!(
            repo.member_status(&org, &user_id).unwrap(),
            Some(MemberStatus::Suspended)
        );

        let user = repo.get_user(&user_id).unwrap().unwrap();
        assert_eq!(user.display_name(), "Bea");
    }

    #[test]
    fn test_soft_deleted_document_is_hidden() {
        let repo = setup_test_db();
        let org = repo.create_organization("Acme").unwrap();
        let doc = repo.create_document(&org, "Plan").unwrap();

        assert_eq!(repo.get_document(&doc).unwrap().unwrap().title, "Plan");
        assert!(repo.soft_delete_document(&doc).unwrap());
        assert!(repo.get_document(&doc).unwrap().is_none());
        assert!(!repo.soft_delete_document(&doc).unwrap());
    }

    #[test]
    fn test_document_state_upsert() {
        let repo = setup_test_db();
        assert!(repo.load_document_state("doc").unwrap().is_none());

        repo.save_document_state("doc", &[1, 2]).unwrap();
        repo.save_document_state("doc", &[3]).unwrap();
        let row = repo.load_document_state("doc").unwrap().unwrap();
        assert_eq!(row.state, vec![3]);
    }
}
