use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::TrackerError;
use crate::store::{CompanyDirectory, EntryQuery, EntryRepository, Member, MemberUpdate, NewTask, Task};
use crate::time_entry::{
    EntryId, EntryStatus, EntryUpdate, MemberFilter, NewTimeEntry, TimeEntry,
};

const ENTRIES: &str = "timeEntries";
const MEMBERS: &str = "members";
const TASKS: &str = "tasks";

/// ドキュメントストアのREST APIが返すドキュメント。
#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

/// `runQuery`のレスポンスの1要素。結果が0件のときは`document`を含まない要素が返る。
#[derive(Debug, Deserialize)]
struct QueryItem {
    document: Option<Document>,
}

/// ホスト型ドキュメントストアと通信するためのクライアント。
///
/// すべてのリクエストはサインイン中ユーザーのIDトークンで認可される。
pub struct FirestoreClient {
    client: Client,
    api_url: String,
    database: String,
    id_token: String,
}

impl FirestoreClient {
    /// 新しい`FirestoreClient`を返す。
    ///
    /// # Arguments
    ///
    /// * `config` - 接続先の設定
    /// * `id_token` - 認証サービスが発行したIDトークン
    pub fn new(config: &Config, id_token: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: config.firestore_url.trim_end_matches('/').to_string(),
            database: format!("projects/{}/databases/(default)", config.project_id),
            id_token: id_token.to_string(),
        }
    }

    fn documents_url(&self) -> String {
        format!("{}/{}/documents", self.api_url, self.database)
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database, collection, id)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.api_url, self.document_name(collection, id))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TrackerError> {
        let response = request.bearer_auth(&self.id_token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!("Document store returned {}: {}", status, body);
        Err(TrackerError::from_status(status, &body))
    }

    async fn run_query(&self, structured_query: Value) -> Result<Vec<Document>, TrackerError> {
        let items = self
            .send(
                self.client
                    .post(format!("{}:runQuery", self.documents_url()))
                    .json(&json!({ "structuredQuery": structured_query })),
            )
            .await?
            .json::<Vec<QueryItem>>()
            .await?;

        Ok(items.into_iter().filter_map(|item| item.document).collect())
    }

    /// 時刻の降順、同時刻はドキュメント名の降順で並べる範囲クエリを組み立てる。
    fn entries_query(&self, query: &EntryQuery) -> Value {
        let mut filters = vec![field_filter("companyId", string_value(&query.company_id))];
        match &query.filters.member {
            MemberFilter::All => {}
            MemberFilter::Company => filters.push(json!({
                "unaryFilter": { "field": { "fieldPath": "memberId" }, "op": "IS_NULL" }
            })),
            MemberFilter::Member(id) => filters.push(field_filter("memberId", string_value(id))),
        }
        if let Some(status) = query.filters.status {
            filters.push(field_filter("status", string_value(status.as_str())));
        }

        let mut structured = json!({
            "from": [{ "collectionId": ENTRIES }],
            "where": { "compositeFilter": { "op": "AND", "filters": filters } },
            "orderBy": [
                { "field": { "fieldPath": "timestamp" }, "direction": "DESCENDING" },
                { "field": { "fieldPath": "__name__" }, "direction": "DESCENDING" },
            ],
            "limit": query.limit,
        });
        if let Some(cursor) = &query.start_after {
            structured["startAt"] = json!({
                "values": [
                    timestamp_value(&cursor.timestamp),
                    { "referenceValue": self.document_name(ENTRIES, &cursor.id.0) },
                ],
                "before": false,
            });
        }

        structured
    }
}

#[async_trait]
impl EntryRepository for FirestoreClient {
    async fn insert_entry(&self, entry: &NewTimeEntry) -> Result<EntryId, TrackerError> {
        let document = self
            .send(
                self.client
                    .post(format!("{}/{}", self.documents_url(), ENTRIES))
                    .json(&json!({ "fields": encode_entry(entry) })),
            )
            .await?
            .json::<Document>()
            .await?;
        let id = EntryId(document_id(&document.name).to_string());
        info!("Inserted time entry {} for {}", id, entry.company_id);

        Ok(id)
    }

    async fn get_entry(&self, id: &EntryId) -> Result<TimeEntry, TrackerError> {
        let document = self
            .send(self.client.get(self.document_url(ENTRIES, &id.0)))
            .await?
            .json::<Document>()
            .await?;

        decode_entry(&document)
    }

    async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<TimeEntry>, TrackerError> {
        let documents = self.run_query(self.entries_query(query)).await?;
        debug!("Query returned {} entries", documents.len());

        documents.iter().map(decode_entry).collect()
    }

    async fn update_entry(&self, id: &EntryId, update: &EntryUpdate) -> Result<(), TrackerError> {
        let fields = json!({
            "projectName": string_value(&update.project),
            "duration": integer_value(update.duration.num_seconds()),
            "timestamp": timestamp_value(&update.timestamp),
        });
        self.send(
            self.client
                .patch(self.document_url(ENTRIES, &id.0))
                .query(&[
                    ("updateMask.fieldPaths", "projectName"),
                    ("updateMask.fieldPaths", "duration"),
                    ("updateMask.fieldPaths", "timestamp"),
                    ("currentDocument.exists", "true"),
                ])
                .json(&json!({ "fields": fields })),
        )
        .await?;
        info!("Updated time entry {}", id);

        Ok(())
    }

    async fn set_status(&self, id: &EntryId, status: EntryStatus) -> Result<(), TrackerError> {
        self.send(
            self.client
                .patch(self.document_url(ENTRIES, &id.0))
                .query(&[
                    ("updateMask.fieldPaths", "status"),
                    ("currentDocument.exists", "true"),
                ])
                .json(&json!({ "fields": { "status": string_value(status.as_str()) } })),
        )
        .await?;
        info!("Marked time entry {} as {}", id, status);

        Ok(())
    }

    async fn delete_entry(&self, id: &EntryId) -> Result<(), TrackerError> {
        self.send(
            self.client
                .delete(self.document_url(ENTRIES, &id.0))
                .query(&[("currentDocument.exists", "true")]),
        )
        .await?;
        info!("Deleted time entry {}", id);

        Ok(())
    }

    async fn list_company_entries(&self, company_id: &str) -> Result<Vec<TimeEntry>, TrackerError> {
        let structured = json!({
            "from": [{ "collectionId": ENTRIES }],
            "where": field_filter("companyId", string_value(company_id)),
            "orderBy": [{ "field": { "fieldPath": "timestamp" }, "direction": "DESCENDING" }],
        });
        let documents = self.run_query(structured).await?;
        info!("Loaded {} entries for {}", documents.len(), company_id);

        documents.iter().map(decode_entry).collect()
    }

    async fn get_member(&self, member_id: &str) -> Result<Member, TrackerError> {
        let document = self
            .send(self.client.get(self.document_url(MEMBERS, member_id)))
            .await?
            .json::<Document>()
            .await?;

        decode_member(&document)
    }

    async fn list_members(&self, company_id: &str) -> Result<Vec<Member>, TrackerError> {
        let structured = json!({
            "from": [{ "collectionId": MEMBERS }],
            "where": field_filter("companyId", string_value(company_id)),
        });
        let documents = self.run_query(structured).await?;

        documents.iter().map(decode_member).collect()
    }
}

#[async_trait]
impl CompanyDirectory for FirestoreClient {
    async fn update_member(&self, member_id: &str, update: &MemberUpdate) -> Result<(), TrackerError> {
        let fields = json!({
            "name": string_value(&update.name),
            "email": string_value(&update.email),
        });
        self.send(
            self.client
                .patch(self.document_url(MEMBERS, member_id))
                .query(&[
                    ("updateMask.fieldPaths", "name"),
                    ("updateMask.fieldPaths", "email"),
                    ("currentDocument.exists", "true"),
                ])
                .json(&json!({ "fields": fields })),
        )
        .await?;
        info!("Updated member {}", member_id);

        Ok(())
    }

    async fn delete_member(&self, member_id: &str) -> Result<(), TrackerError> {
        self.send(
            self.client
                .delete(self.document_url(MEMBERS, member_id))
                .query(&[("currentDocument.exists", "true")]),
        )
        .await?;
        info!("Deleted member {}", member_id);

        Ok(())
    }

    async fn list_tasks(&self, company_id: &str) -> Result<Vec<Task>, TrackerError> {
        let structured = json!({
            "from": [{ "collectionId": TASKS }],
            "where": field_filter("companyId", string_value(company_id)),
        });
        let documents = self.run_query(structured).await?;
        debug!("Loaded {} tasks for {}", documents.len(), company_id);

        documents.iter().map(decode_task).collect()
    }

    async fn get_task(&self, task_id: &str) -> Result<Task, TrackerError> {
        let document = self
            .send(self.client.get(self.document_url(TASKS, task_id)))
            .await?
            .json::<Document>()
            .await?;

        decode_task(&document)
    }

    async fn insert_task(&self, task: &NewTask) -> Result<Task, TrackerError> {
        let fields = json!({
            "name": string_value(&task.name),
            "companyId": string_value(&task.company_id),
            "createdAt": timestamp_value(&task.created_at),
        });
        let document = self
            .send(
                self.client
                    .post(format!("{}/{}", self.documents_url(), TASKS))
                    .json(&json!({ "fields": fields })),
            )
            .await?
            .json::<Document>()
            .await?;
        let id = document_id(&document.name).to_string();
        info!("Inserted task {} for {}", id, task.company_id);

        Ok(Task {
            id,
            company_id: task.company_id.clone(),
            name: task.name.clone(),
        })
    }

    async fn rename_task(&self, task_id: &str, name: &str) -> Result<(), TrackerError> {
        self.send(
            self.client
                .patch(self.document_url(TASKS, task_id))
                .query(&[
                    ("updateMask.fieldPaths", "name"),
                    ("currentDocument.exists", "true"),
                ])
                .json(&json!({ "fields": { "name": string_value(name) } })),
        )
        .await?;
        info!("Renamed task {}", task_id);

        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), TrackerError> {
        self.send(
            self.client
                .delete(self.document_url(TASKS, task_id))
                .query(&[("currentDocument.exists", "true")]),
        )
        .await?;
        info!("Deleted task {}", task_id);

        Ok(())
    }
}

fn field_filter(field: &str, value: Value) -> Value {
    json!({
        "fieldFilter": { "field": { "fieldPath": field }, "op": "EQUAL", "value": value }
    })
}

fn string_value(value: &str) -> Value {
    json!({ "stringValue": value })
}

/// int64は文字列として送る。
fn integer_value(value: i64) -> Value {
    json!({ "integerValue": value.to_string() })
}

fn timestamp_value(value: &DateTime<Utc>) -> Value {
    json!({ "timestampValue": value.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
}

fn encode_entry(entry: &NewTimeEntry) -> Value {
    let member_id = match &entry.member_id {
        Some(id) => string_value(id),
        None => json!({ "nullValue": null }),
    };
    json!({
        "projectName": string_value(&entry.project),
        "duration": integer_value(entry.duration.num_seconds()),
        "timestamp": timestamp_value(&entry.timestamp),
        "companyId": string_value(&entry.company_id),
        "memberId": member_id,
        "status": string_value(entry.status.as_str()),
    })
}

fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn get_string(fields: &HashMap<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)?
        .get("stringValue")?
        .as_str()
        .map(str::to_string)
}

/// 整数は`integerValue`（文字列）だが、古いエントリーには`doubleValue`もあるので両方読む。
fn get_integer(fields: &HashMap<String, Value>, key: &str) -> Option<i64> {
    let value = fields.get(key)?;
    if let Some(integer) = value.get("integerValue") {
        return match integer {
            Value::String(text) => text.parse().ok(),
            other => other.as_i64(),
        };
    }
    value
        .get("doubleValue")
        .and_then(Value::as_f64)
        .map(|double| double.floor() as i64)
}

fn get_timestamp(fields: &HashMap<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let text = fields.get(key)?.get("timestampValue")?.as_str()?;
    DateTime::parse_from_rfc3339(text).ok().map(|time| time.to_utc())
}

fn decode_entry(document: &Document) -> Result<TimeEntry, TrackerError> {
    let fields = &document.fields;
    let missing = |field: &str| {
        TrackerError::Decode(format!("{} is missing {}", document.name, field))
    };

    let seconds = get_integer(fields, "duration").ok_or_else(|| missing("duration"))?;
    let duration = Duration::try_seconds(seconds.max(0)).ok_or_else(|| {
        TrackerError::Decode(format!("{} has an out of range duration", document.name))
    })?;
    let status = match get_string(fields, "status") {
        Some(status) => status.parse()?,
        // statusを持たない古いエントリーはオーナーが記録したもの
        None => EntryStatus::Approved,
    };

    Ok(TimeEntry {
        id: EntryId(document_id(&document.name).to_string()),
        project: get_string(fields, "projectName").unwrap_or_default(),
        duration,
        timestamp: get_timestamp(fields, "timestamp").ok_or_else(|| missing("timestamp"))?,
        company_id: get_string(fields, "companyId").ok_or_else(|| missing("companyId"))?,
        member_id: get_string(fields, "memberId"),
        status,
    })
}

fn decode_member(document: &Document) -> Result<Member, TrackerError> {
    let fields = &document.fields;

    Ok(Member {
        id: document_id(&document.name).to_string(),
        company_id: get_string(fields, "companyId").ok_or_else(|| {
            TrackerError::Decode(format!("{} is missing companyId", document.name))
        })?,
        name: get_string(fields, "name").unwrap_or_default(),
        email: get_string(fields, "email").unwrap_or_default(),
    })
}

fn decode_task(document: &Document) -> Result<Task, TrackerError> {
    let fields = &document.fields;
    let missing = |field: &str| {
        TrackerError::Decode(format!("{} is missing {}", document.name, field))
    };

    Ok(Task {
        id: document_id(&document.name).to_string(),
        company_id: get_string(fields, "companyId").ok_or_else(|| missing("companyId"))?,
        name: get_string(fields, "name").ok_or_else(|| missing("name"))?,
    })
}
