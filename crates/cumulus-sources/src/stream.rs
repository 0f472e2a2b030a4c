//! Lazy, restartable item sequence over a paginated source.
//!
//! Pages are fetched only when the previous one is used up. Item `k` lives on
//! page `k / page_size`, so a stream started at `k` fetches that page, drops
//! the hits before `k` unresolved, and carries on from there.

use std::collections::VecDeque;

use cumulus_core::{Attempt, FetchError, Query, retry_with_backoff};

use crate::source::{Hit, ItemOutcome, Source, SourceContext};

/// Predicate telling whether an object id is already stored.
pub type KnownFn<'a> = dyn Fn(&str) -> bool + Sync + 'a;

/// Iterator over `(index, outcome)` for one query against one source.
///
/// Yields `Err` once, and then ends, when the source itself can go no
/// further: a search page failing after retries, or a fatal error such as
/// rejected credentials.
pub struct RecordStream<'a> {
    source: &'a dyn Source,
    query: &'a Query,
    ctx: &'a SourceContext,
    known: Option<&'a KnownFn<'a>>,
    limit: Option<usize>,
    next: usize,
    buffer: VecDeque<Hit>,
    last_page: bool,
    done: bool,
}

impl<'a> RecordStream<'a> {
    pub fn new(source: &'a dyn Source, query: &'a Query, ctx: &'a SourceContext) -> Self {
        Self {
            source,
            query,
            ctx,
            known: None,
            limit: query.limit_for(source.tag()),
            next: 0,
            buffer: VecDeque::new(),
            last_page: false,
            done: false,
        }
    }

    /// Resume at item index `k`; earlier items are never resolved.
    pub fn starting_at(mut self, k: usize) -> Self {
        self.next = k;
        self.buffer.clear();
        self.last_page = false;
        self
    }

    /// Skip ids for which `known` returns true without fetching them.
    pub fn skip_known(mut self, known: &'a KnownFn<'a>) -> Self {
        self.known = Some(known);
        self
    }

    /// Index of the next item the stream would yield
    pub fn position(&self) -> usize {
        self.next
    }

    fn label(&self) -> String {
        format!("{} '{}'", self.source.tag(), self.query.keyword())
    }

    fn is_known(&self, id: &str) -> bool {
        self.known.is_some_and(|known| known(id))
    }

    /// Refill the buffer with the page holding item `self.next`.
    fn fill(&mut self) -> Result<(), FetchError> {
        let page_size = self.source.page_size().max(1);
        let page_no = self.next / page_size;
        let label = format!("{} page {page_no}", self.label());
        let (source, query, ctx) = (self.source, self.query, self.ctx);

        let attempt = retry_with_backoff(&label, &ctx.retry, || {
            ctx.limiter.wait();
            source.fetch_page(query, page_no)
        });
        let page = match attempt {
            Attempt::Done(page) => page,
            Attempt::Recoverable(e) | Attempt::Fatal(e) => return Err(e),
        };

        let mut hits = page.hits;
        let fetched = hits.len();
        hits.truncate(page_size);
        let reached = (page_no + 1) * page_size;
        self.last_page = fetched < page_size || page.total.is_some_and(|t| reached >= t);

        let offset = self.next - page_no * page_size;
        log::debug!(
            "{label}: {fetched} hits (total {:?}), starting at offset {offset}",
            page.total
        );
        self.buffer = hits.into_iter().skip(offset).collect();
        Ok(())
    }

    /// Resolve one hit; `Err` means the source cannot continue.
    fn resolve(&self, hit: Hit) -> Result<ItemOutcome, FetchError> {
        let raw = match hit {
            Hit::Full(raw) => raw,
            Hit::Ref(id) => {
                if self.is_known(&id) {
                    return Ok(ItemOutcome::AlreadyStored { object_id: id });
                }
                let label = format!("{} item {id}", self.source.tag());
                let (source, ctx) = (self.source, self.ctx);
                let attempt = retry_with_backoff(&label, &ctx.retry, || {
                    ctx.limiter.wait();
                    source.fetch_item(Hit::Ref(id.clone()))
                });
                match attempt {
                    Attempt::Done(raw) => raw,
                    Attempt::Recoverable(error) => {
                        return Ok(ItemOutcome::Failed {
                            object_id: Some(id),
                            error,
                        });
                    }
                    Attempt::Fatal(error) => return Err(error),
                }
            }
        };

        let record = self.source.normalize(&raw);
        if self.is_known(&record.object_id) {
            return Ok(ItemOutcome::AlreadyStored {
                object_id: record.object_id,
            });
        }
        if let Some(reason) = self.source.reject(&raw) {
            return Ok(ItemOutcome::Rejected { record, reason });
        }
        if let Some(term) = self.query.excluded_term(&record) {
            let term = term.to_string();
            return Ok(ItemOutcome::Excluded { record, term });
        }
        Ok(ItemOutcome::Collected(record))
    }
}

impl Iterator for RecordStream<'_> {
    type Item = Result<(usize, ItemOutcome), FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.limit.is_some_and(|limit| self.next >= limit) {
            self.done = true;
            return None;
        }
        if self.buffer.is_empty() {
            if self.last_page {
                self.done = true;
                return None;
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
            if self.buffer.is_empty() {
                self.done = true;
                return None;
            }
        }

        let hit = self.buffer.pop_front()?;
        let index = self.next;
        match self.resolve(hit) {
            Ok(outcome) => {
                self.next += 1;
                Some(Ok((index, outcome)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
