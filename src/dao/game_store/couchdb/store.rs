use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::debug;

use crate::dao::{
    game_store::{GameStore, MatchStore, ProfileStore, QuestionBank, ReportStore},
    models::{
        ChapterEntity, MatchEntity, ProfileEntity, QuestionEntity, ReportEntity, Revision,
        Versioned,
    },
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchChapterDocument, CouchMatchDocument, CouchProfileDocument,
        CouchQuestionsDocument, CouchReportDocument, END_SUFFIX, PutResponse, chapter_prefix, match_doc_id,
        profile_doc_id, questions_doc_id,
    },
};

/// Match store backed by a single CouchDB database.
///
/// Matches, profiles, chapters and question lists are documents whose ids
/// carry a type prefix; CouchDB `_rev` values double as [`Revision`]s.
#[derive(Clone)]
pub struct CouchGameStore {
    client: Client,
    base_url: Url,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    max_update_attempts: u32,
}

impl CouchGameStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|err| {
            CouchDaoError::InvalidBaseUrl {
                url: config.base_url.clone(),
                message: err.to_string(),
            }
        })?;
        let auth = match (config.username, config.password) {
            (Some(user), Some(pass)) => Some((Arc::from(user), Arc::from(pass))),
            _ => None,
        };

        let store = Self {
            client,
            base_url,
            database: Arc::from(config.database),
            auth,
            max_update_attempts: config.max_update_attempts.max(1),
        };
        store.ensure_database().await?;
        Ok(store)
    }

    /// Database URL, extended with `doc_id` when given.
    fn url(&self, doc_id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.database);
            if let Some(doc_id) = doc_id {
                path.push(doc_id);
            }
        }
        url
    }

    fn request(&self, method: Method, doc_id: Option<&str>) -> RequestBuilder {
        let builder = self.client.request(method, self.url(doc_id));
        match &self.auth {
            Some((user, pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder, path: &str) -> CouchResult<Response> {
        builder
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_string(),
                source,
            })
    }

    async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> CouchResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .request(Method::GET, None)
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        let status = match response.status() {
            StatusCode::OK => return Ok(()),
            StatusCode::NOT_FOUND => self
                .request(Method::PUT, None)
                .send()
                .await
                .map_err(|source| CouchDaoError::DatabaseCreate {
                    database: database.clone(),
                    source,
                })?
                .status(),
            other => other,
        };

        // 412 means another instance created it first.
        if status.is_success() || status == StatusCode::PRECONDITION_FAILED {
            debug!(database = %database, "CouchDB database ready");
            Ok(())
        } else {
            Err(CouchDaoError::DatabaseStatus { database, status })
        }
    }

    async fn get_document<T: DeserializeOwned>(&self, doc_id: &str) -> CouchResult<Option<T>> {
        let response = Self::send(self.request(Method::GET, Some(doc_id)), doc_id).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Self::decode(response, doc_id).await.map(Some),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status,
            }),
        }
    }

    /// PUT a document, returning the new revision. A stale or missing `_rev`
    /// surfaces as [`CouchDaoError::Conflict`].
    async fn put_document<T: ?Sized + Serialize>(
        &self,
        doc_id: &str,
        document: &T,
    ) -> CouchResult<String> {
        let builder = self.request(Method::PUT, Some(doc_id)).json(document);
        let response = Self::send(builder, doc_id).await?;
        match response.status() {
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: doc_id.to_string(),
            }),
            status if status.is_success() => Self::decode::<PutResponse>(response, doc_id)
                .await
                .map(|body| body.rev),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status,
            }),
        }
    }

    /// Delete at `rev`; an already missing document counts as deleted.
    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<()> {
        let builder = self.request(Method::DELETE, Some(doc_id)).query(&[("rev", rev)]);
        match Self::send(builder, doc_id).await?.status() {
            StatusCode::NOT_FOUND => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: doc_id.to_string(),
            }),
            status if status.is_success() => Ok(()),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status,
            }),
        }
    }

    /// Every document whose id starts with `prefix`, via `_all_docs` key ranges.
    async fn list_documents<T: DeserializeOwned>(&self, prefix: &str) -> CouchResult<Vec<T>> {
        const ALL_DOCS: &str = "_all_docs";
        let range = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{prefix}\"")),
            ("endkey", format!("\"{prefix}{END_SUFFIX}\"")),
        ];

        let builder = self.request(Method::GET, Some(ALL_DOCS)).query(&range);
        let response = Self::send(builder, ALL_DOCS).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status,
            });
        }

        let listing: AllDocsResponse = Self::decode(response, ALL_DOCS).await?;
        listing
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })
            })
            .collect()
    }

    /// Read-modify-write a profile document, retrying on revision conflicts.
    async fn update_profile<R>(
        &self,
        uid: &str,
        mut change: impl FnMut(&mut ProfileEntity) -> R,
    ) -> CouchResult<R> {
        let doc_id = profile_doc_id(uid);
        for attempt in 1..=self.max_update_attempts {
            let mut doc = self
                .get_document::<CouchProfileDocument>(&doc_id)
                .await?
                .unwrap_or_else(|| CouchProfileDocument::blank(uid));
            let result = change(&mut doc.profile);

            match self.put_document(&doc_id, &doc).await {
                Ok(_) => return Ok(result),
                Err(CouchDaoError::Conflict { .. }) => {
                    debug!(doc_id = %doc_id, attempt, "profile update conflicted; retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Err(CouchDaoError::ContentionExhausted {
            path: doc_id,
            attempts: self.max_update_attempts,
        })
    }
}

impl MatchStore for CouchGameStore {
    fn find_match(
        &self,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<MatchEntity>>>> {
        let store = self.clone();
        let doc_id = match_doc_id(id);
        Box::pin(async move {
            let maybe_doc = store.get_document::<CouchMatchDocument>(&doc_id).await?;
            Ok(maybe_doc.and_then(|doc| {
                doc.rev.map(|rev| Versioned {
                    revision: Revision(rev),
                    value: doc.record,
                })
            }))
        })
    }

    fn create_match(&self, entity: MatchEntity) -> BoxFuture<'static, StorageResult<Revision>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = CouchMatchDocument::from((entity, None));
            let rev = store.put_document(&doc.id, &doc).await?;
            Ok(Revision(rev))
        })
    }

    fn update_match(
        &self,
        entity: MatchEntity,
        expected: Revision,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = CouchMatchDocument::from((entity, Some(expected.0)));
            let rev = store.put_document(&doc.id, &doc).await?;
            Ok(Revision(rev))
        })
    }

    fn delete_match(&self, id: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let doc_id = match_doc_id(id);
        Box::pin(async move {
            let Some(doc) = store.get_document::<CouchMatchDocument>(&doc_id).await? else {
                return Ok(());
            };
            let Some(rev) = doc.rev else {
                return Ok(());
            };
            store
                .delete_document(&doc_id, &rev)
                .await
                .map_err(Into::into)
        })
    }
}

impl QuestionBank for CouchGameStore {
    fn chapter_questions(
        &self,
        chapter_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let store = self.clone();
        let doc_id = questions_doc_id(chapter_id);
        Box::pin(async move {
            let doc = store
                .get_document::<CouchQuestionsDocument>(&doc_id)
                .await?;
            Ok(doc.map(|doc| doc.questions).unwrap_or_default())
        })
    }

    fn subject_chapters(
        &self,
        subject_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ChapterEntity>>> {
        let store = self.clone();
        let prefix = chapter_prefix(subject_id);
        Box::pin(async move {
            let docs = store
                .list_documents::<CouchChapterDocument>(&prefix)
                .await?;
            Ok(docs.into_iter().map(|doc| doc.chapter).collect())
        })
    }
}

impl ProfileStore for CouchGameStore {
    fn find_profile(&self, uid: &str) -> BoxFuture<'static, StorageResult<Option<ProfileEntity>>> {
        let store = self.clone();
        let doc_id = profile_doc_id(uid);
        Box::pin(async move {
            let doc = store
                .get_document::<CouchProfileDocument>(&doc_id)
                .await?;
            Ok(doc.map(|doc| doc.profile))
        })
    }

    fn apply_award(
        &self,
        uid: &str,
        match_id: &str,
        points: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let uid = uid.to_string();
        let match_id = match_id.to_string();
        Box::pin(async move {
            store
                .update_profile(&uid, |profile| profile.apply_award(&match_id, points))
                .await
                .map_err(Into::into)
        })
    }

    fn set_active_match(
        &self,
        uid: &str,
        match_id: Option<String>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let uid = uid.to_string();
        Box::pin(async move {
            store
                .update_profile(&uid, |profile| profile.active_match = match_id.clone())
                .await
                .map_err(Into::into)
        })
    }
}

impl ReportStore for CouchGameStore {
    fn create_report(&self, report: ReportEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = CouchReportDocument::from(report);
            store.put_document(&doc.id, &doc).await?;
            Ok(())
        })
    }
}

impl GameStore for CouchGameStore {
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let path = store.database.to_string();
            let response = Self::send(store.request(Method::GET, None), &path).await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus { path, status }.into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
