use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::error::Result;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Backing-store dialect of the patch script. Chosen once per run; the
/// rest of the engine is dialect-agnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Mysql,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct IssueCorePatch<'a> {
    pub status_id: u64,
    pub author_id: u64,
    pub done_ratio: u8,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
    pub due_date: Option<NaiveDate>,
    pub description: &'a str,
}

#[derive(Debug, Clone)]
pub struct CommentPatch<'a> {
    pub user_id: u64,
    pub body: &'a str,
    pub created: NaiveDateTime,
    pub private: bool,
}

#[derive(Debug, Clone)]
pub struct StatusChangePatch {
    pub user_id: u64,
    pub old_value: u64,
    pub new_value: u64,
    pub created: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct AttachmentPatch<'a> {
    pub user_id: u64,
    pub file_name: &'a str,
    pub disk_name: &'a str,
    pub size: u64,
    pub mime_type: &'a str,
    pub digest: &'a str,
    pub created: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct WorklogPatch<'a> {
    pub project_id: u64,
    pub user_id: u64,
    pub comment: &'a str,
    pub created: NaiveDateTime,
    pub hours: f64,
    pub activity_id: u64,
}

impl Dialect {
    fn quote(self, ident: &str) -> String {
        match self {
            Self::Mysql => format!("`{ident}`"),
            Self::Postgres => ident.to_string(),
        }
    }

    fn ts(self, value: NaiveDateTime) -> String {
        let formatted = value.format(TS_FORMAT);
        match self {
            Self::Mysql => format!("TIMESTAMP('{formatted}')"),
            Self::Postgres => format!("'{formatted}'"),
        }
    }

    fn due(self, value: Option<NaiveDate>) -> String {
        match value {
            Some(date) => format!("'{}'", date.format("%Y-%m-%d")),
            None => "NULL".to_string(),
        }
    }

    /// Decode a base64 payload back to text inside the statement itself.
    /// Free-form text never appears as an escaped literal.
    fn decode_text(self, raw: &str) -> String {
        let encoded = B64.encode(raw);
        match self {
            Self::Mysql => format!("FROM_BASE64('{encoded}')"),
            Self::Postgres => format!("CONVERT_FROM(DECODE('{encoded}', 'base64'), 'UTF8')"),
        }
    }

    fn last_insert_id(self, sequence: &str) -> String {
        match self {
            Self::Mysql => "LAST_INSERT_ID()".to_string(),
            Self::Postgres => format!("CURRVAL('{sequence}')"),
        }
    }

    fn bool_lit(self, value: bool) -> &'static str {
        match (self, value) {
            (Self::Mysql, true) => "1",
            (Self::Mysql, false) => "0",
            (Self::Postgres, true) => "TRUE",
            (Self::Postgres, false) => "FALSE",
        }
    }

    fn date_part(self, part: &str, value: NaiveDateTime) -> String {
        let formatted = value.format(TS_FORMAT);
        match self {
            Self::Mysql => format!("{part}(TIMESTAMP('{formatted}'))"),
            Self::Postgres => format!("EXTRACT({part} FROM TIMESTAMP '{formatted}')"),
        }
    }

    /// Core issue fields the creation API refuses to set, plus the journal
    /// timestamp back-date.
    pub fn render_issue_core(self, issue_id: u64, patch: &IssueCorePatch) -> Vec<String> {
        vec![
            format!(
                "UPDATE {issues} SET {created_on} = {created}, {start_date} = {created}, \
                 {updated_on} = {updated}, {status_id} = {status}, {author_id} = {author}, \
                 {done_ratio} = {ratio}, {due_date} = {due}, {description} = {body} WHERE id = {issue_id};",
                issues = self.quote("issues"),
                created_on = self.quote("created_on"),
                start_date = self.quote("start_date"),
                updated_on = self.quote("updated_on"),
                status_id = self.quote("status_id"),
                author_id = self.quote("author_id"),
                done_ratio = self.quote("done_ratio"),
                due_date = self.quote("due_date"),
                description = self.quote("description"),
                created = self.ts(patch.created),
                updated = self.ts(patch.updated),
                status = patch.status_id,
                author = patch.author_id,
                ratio = patch.done_ratio,
                due = self.due(patch.due_date),
                body = self.decode_text(patch.description),
            ),
            format!(
                "UPDATE {journals} SET {created_on} = {created} \
                 WHERE {jtype} = 'Issue' AND {jid} = {issue_id};",
                journals = self.quote("journals"),
                created_on = self.quote("created_on"),
                jtype = self.quote("journalized_type"),
                jid = self.quote("journalized_id"),
                created = self.ts(patch.created),
            ),
        ]
    }

    pub fn render_comment(self, issue_id: u64, patch: &CommentPatch) -> Vec<String> {
        vec![format!(
            "INSERT INTO {journals} ({jid}, {jtype}, {user_id}, {notes}, {created_on}, {private}) \
             VALUES ({issue_id}, 'Issue', {user}, {body}, {created}, {is_private});",
            journals = self.quote("journals"),
            jid = self.quote("journalized_id"),
            jtype = self.quote("journalized_type"),
            user_id = self.quote("user_id"),
            notes = self.quote("notes"),
            created_on = self.quote("created_on"),
            private = self.quote("private_notes"),
            user = patch.user_id,
            body = self.decode_text(patch.body),
            created = self.ts(patch.created),
            is_private = self.bool_lit(patch.private),
        )]
    }

    /// Journal row plus its detail row. The detail reads the journal id via
    /// the last-inserted-id idiom, so the pair must stay adjacent and be
    /// replayed in emission order.
    pub fn render_status_change(self, issue_id: u64, patch: &StatusChangePatch) -> Vec<String> {
        vec![
            format!(
                "INSERT INTO {journals} ({jid}, {jtype}, {user_id}, {notes}, {created_on}) \
                 VALUES ({issue_id}, 'Issue', {user}, '', {created});",
                journals = self.quote("journals"),
                jid = self.quote("journalized_id"),
                jtype = self.quote("journalized_type"),
                user_id = self.quote("user_id"),
                notes = self.quote("notes"),
                created_on = self.quote("created_on"),
                user = patch.user_id,
                created = self.ts(patch.created),
            ),
            format!(
                "INSERT INTO {details} ({journal_id}, {property}, {prop_key}, {old_value}, {value}) \
                 VALUES ({last_id}, 'attr', 'status_id', '{old}', '{new}');",
                details = self.quote("journal_details"),
                journal_id = self.quote("journal_id"),
                property = self.quote("property"),
                prop_key = self.quote("prop_key"),
                old_value = self.quote("old_value"),
                value = self.quote("value"),
                last_id = self.last_insert_id("journals_id_seq"),
                old = patch.old_value,
                new = patch.new_value,
            ),
        ]
    }

    pub fn render_attachment(self, issue_id: u64, patch: &AttachmentPatch) -> Vec<String> {
        let mut statements = vec![format!(
            "INSERT INTO {attachments} ({container_id}, {description}, {author_id}, \
             {container_type}, {filename}, {disk_filename}, {disk_directory}, {filesize}, \
             {content_type}, {digest}, {created_on}) \
             VALUES ({issue_id}, '', {user}, 'Issue', {name}, {disk}, 'migrated', {size}, \
             '{mime}', '{digest_value}', {created});",
            attachments = self.quote("attachments"),
            container_id = self.quote("container_id"),
            description = self.quote("description"),
            author_id = self.quote("author_id"),
            container_type = self.quote("container_type"),
            filename = self.quote("filename"),
            disk_filename = self.quote("disk_filename"),
            disk_directory = self.quote("disk_directory"),
            filesize = self.quote("filesize"),
            content_type = self.quote("content_type"),
            digest = self.quote("digest"),
            created_on = self.quote("created_on"),
            user = patch.user_id,
            name = self.decode_text(patch.file_name),
            disk = self.decode_text(patch.disk_name),
            size = patch.size,
            mime = patch.mime_type,
            digest_value = patch.digest,
            created = self.ts(patch.created),
        )];
        // MySQL needs the attachment id parked before the journal insert
        // overwrites LAST_INSERT_ID(); Postgres reads the sequence directly.
        if self == Self::Mysql {
            statements.push("SELECT LAST_INSERT_ID() INTO @PROP_KEY;".to_string());
        }
        let prop_key = match self {
            Self::Mysql => "@PROP_KEY".to_string(),
            Self::Postgres => self.last_insert_id("attachments_id_seq"),
        };
        statements.push(format!(
            "INSERT INTO {journals} ({jid}, {jtype}, {user_id}, {notes}, {created_on}) \
             VALUES ({issue_id}, 'Issue', {user}, '', {created});",
            journals = self.quote("journals"),
            jid = self.quote("journalized_id"),
            jtype = self.quote("journalized_type"),
            user_id = self.quote("user_id"),
            notes = self.quote("notes"),
            created_on = self.quote("created_on"),
            user = patch.user_id,
            created = self.ts(patch.created),
        ));
        statements.push(format!(
            "INSERT INTO {details} ({journal_id}, {property}, {prop_key_col}, {value}) \
             VALUES ({last_id}, 'attachment', {prop_key}, {name});",
            details = self.quote("journal_details"),
            journal_id = self.quote("journal_id"),
            property = self.quote("property"),
            prop_key_col = self.quote("prop_key"),
            value = self.quote("value"),
            last_id = self.last_insert_id("journals_id_seq"),
            name = self.decode_text(patch.file_name),
        ));
        statements
    }

    pub fn render_worklog(self, issue_id: u64, patch: &WorklogPatch) -> Vec<String> {
        vec![format!(
            "INSERT INTO {entries} ({project_id}, {author_id}, {user_id}, {issue_col}, {hours}, \
             {comments}, {activity_id}, {spent_on}, {tyear}, {tmonth}, {tweek}, {created_on}, {updated_on}) \
             VALUES ({project}, {user}, {user}, {issue_id}, {hours_value}, \
             LEFT({comment}, 1024), {activity}, {created}, {year}, {month}, {week}, {created}, {created});",
            entries = self.quote("time_entries"),
            project_id = self.quote("project_id"),
            author_id = self.quote("author_id"),
            user_id = self.quote("user_id"),
            issue_col = self.quote("issue_id"),
            hours = self.quote("hours"),
            comments = self.quote("comments"),
            activity_id = self.quote("activity_id"),
            spent_on = self.quote("spent_on"),
            tyear = self.quote("tyear"),
            tmonth = self.quote("tmonth"),
            tweek = self.quote("tweek"),
            created_on = self.quote("created_on"),
            updated_on = self.quote("updated_on"),
            project = patch.project_id,
            user = patch.user_id,
            hours_value = patch.hours,
            comment = self.decode_text(patch.comment),
            activity = patch.activity_id,
            created = self.ts(patch.created),
            year = self.date_part("YEAR", patch.created),
            month = self.date_part("MONTH", patch.created),
            week = self.date_part("WEEK", patch.created),
        )]
    }

    pub fn render_relation(self, from: u64, to: u64, kind: &str) -> Vec<String> {
        vec![format!(
            "INSERT INTO {relations} ({from_col}, {to_col}, {kind_col}) VALUES ({from}, {to}, '{kind}');",
            relations = self.quote("issue_relations"),
            from_col = self.quote("issue_from_id"),
            to_col = self.quote("issue_to_id"),
            kind_col = self.quote("relation_type"),
        )]
    }
}

/// Append-only producer of the out-of-band patch script. Statements are
/// terminated and flushed one by one; groups that share a last-inserted-id
/// are emitted in a single call and therefore stay adjacent.
pub struct PatchEmitter {
    file: File,
    dialect: Dialect,
}

impl PatchEmitter {
    pub fn open(path: &Path, dialect: Dialect) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file, dialect })
    }

    fn write_group(&mut self, statements: &[String]) -> Result<()> {
        for statement in statements {
            writeln!(self.file, "{statement}")?;
        }
        self.file.flush()?;
        Ok(())
    }

    pub fn issue_core(&mut self, issue_id: u64, patch: &IssueCorePatch) -> Result<()> {
        self.write_group(&self.dialect.render_issue_core(issue_id, patch))
    }

    pub fn comment(&mut self, issue_id: u64, patch: &CommentPatch) -> Result<()> {
        self.write_group(&self.dialect.render_comment(issue_id, patch))
    }

    pub fn status_change(&mut self, issue_id: u64, patch: &StatusChangePatch) -> Result<()> {
        self.write_group(&self.dialect.render_status_change(issue_id, patch))
    }

    pub fn attachment(&mut self, issue_id: u64, patch: &AttachmentPatch) -> Result<()> {
        self.write_group(&self.dialect.render_attachment(issue_id, patch))
    }

    pub fn worklog(&mut self, issue_id: u64, patch: &WorklogPatch) -> Result<()> {
        self.write_group(&self.dialect.render_worklog(issue_id, patch))
    }

    pub fn relation(&mut self, from: u64, to: u64, kind: &str) -> Result<()> {
        self.write_group(&self.dialect.render_relation(from, to, kind))
    }
}
