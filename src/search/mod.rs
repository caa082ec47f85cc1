//! Tantivy-based search index module.
//!
//! Backs the text filter of the diary listing: title and description are
//! tokenized, and every match is scoped to one owner.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser, RegexQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::DiaryEntry;

/// Titles weigh more than body text.
const BOOST_TITLE: f32 = 2.0;

/// Search index schema fields.
struct SearchFields {
    diary_id: Field,
    owner_id: Field,
    title: Field,
    description: Field,
}

/// Tantivy search index for diary entries.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path).map_err(|e| {
            AppError::Internal(format!("Failed to create index directory: {}", e))
        })?;

        let mut schema_builder = Schema::builder();
        let diary_id = schema_builder.add_text_field("diary_id", STRING | STORED);
        let owner_id = schema_builder.add_text_field("owner_id", STRING);
        let title = schema_builder.add_text_field("title", TEXT);
        let description = schema_builder.add_text_field("description", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            diary_id,
            owner_id,
            title,
            description,
        };

        // Try to open existing index or create new one
        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Internal(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Internal(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the entire index from the given entries.
    pub async fn rebuild(&self, entries: &[DiaryEntry]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for entry in entries {
            writer.add_document(self.create_document(entry))?;
        }
        writer.commit()?;

        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} diaries", entries.len());
        Ok(())
    }

    /// Index (or re-index) a single entry.
    pub async fn index_diary(&self, entry: &DiaryEntry) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.diary_id, &entry.id));
        writer.add_document(self.create_document(entry))?;
        writer.commit()?;

        self.reader.reload()?;
        Ok(())
    }

    /// Remove one entry from the index.
    pub async fn remove_diary(&self, diary_id: &str) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.diary_id, diary_id));
        writer.commit()?;

        self.reader.reload()?;
        Ok(())
    }

    /// Remove every entry of one owner.
    pub async fn remove_owner(&self, owner_id: &str) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.owner_id, owner_id));
        writer.commit()?;

        self.reader.reload()?;
        Ok(())
    }

    /// Ids of the owner's entries matching `text`, best match first.
    pub fn search(&self, owner_id: &str, text: &str, limit: usize) -> Result<Vec<String>, AppError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let mut parser =
            QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.description]);
        parser.set_field_boost(self.fields.title, BOOST_TITLE);
        parser.set_conjunction_by_default();

        // User text is free-form; unparsable fragments are dropped instead of failing.
        let (text_query, errors) = parser.parse_query_lenient(text);
        if !errors.is_empty() {
            tracing::debug!("Ignored {} malformed query fragments in {:?}", errors.len(), text);
        }

        // Whole-word hits rank through the parsed query; the partial query lets
        // "bea" find "Beach" and "castle" find "Sandcastles".
        let mut matches = vec![(Occur::Should, text_query)];
        if let Some(partial) = self.partial_word_query(text)? {
            matches.push((Occur::Should, partial));
        }

        let owner_query: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.fields.owner_id, owner_id),
            IndexRecordOption::Basic,
        ));
        let query = BooleanQuery::new(vec![
            (Occur::Must, owner_query),
            (Occur::Must, Box::new(BooleanQuery::new(matches))),
        ]);

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| AppError::RemoteOperationFailed(format!("Search failed: {}", e)))?;

        Ok(top_docs
            .into_iter()
            .filter_map(|(_score, address)| {
                let doc: TantivyDocument = searcher.doc(address).ok()?;
                Some(doc.get_first(self.fields.diary_id)?.as_str()?.to_string())
            })
            .collect())
    }

    /// Every word of `text` must occur inside some indexed token of the title
    /// or the description. Words are split like the default tokenizer splits
    /// text, so they only hold alphanumerics and need no regex escaping.
    fn partial_word_query(&self, text: &str) -> Result<Option<Box<dyn Query>>, AppError> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();
        if words.is_empty() {
            return Ok(None);
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(words.len());
        for word in &words {
            let pattern = format!(".*{}.*", word);
            let in_title: Box<dyn Query> = Box::new(BoostQuery::new(
                Box::new(RegexQuery::from_pattern(&pattern, self.fields.title)?),
                BOOST_TITLE,
            ));
            let in_description: Box<dyn Query> =
                Box::new(RegexQuery::from_pattern(&pattern, self.fields.description)?);
            clauses.push((
                Occur::Must,
                Box::new(BooleanQuery::new(vec![
                    (Occur::Should, in_title),
                    (Occur::Should, in_description),
                ])),
            ));
        }
        Ok(Some(Box::new(BooleanQuery::new(clauses))))
    }

    fn create_document(&self, entry: &DiaryEntry) -> TantivyDocument {
        doc!(
            self.fields.diary_id => entry.id.clone(),
            self.fields.owner_id => entry.owner_id.clone(),
            self.fields.title => entry.title.clone(),
            self.fields.description => entry.description.clone()
        )
    }
}
