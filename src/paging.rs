//! Cursor-driven pagination over a remote list.

use std::collections::VecDeque;
use std::fmt::{self, Display};
use std::future::Future;

use derive_more::From;
use tracing::{debug, trace};

/// A failure to retrieve a page from the remote catalog.
#[derive(From, Debug)]
pub struct FetchError(anyhow::Error);

impl Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,

    /// `None` once the list is exhausted.
    pub next_page_token: Option<String>,
}

/// Something that can fetch one page of a list given a page token.
pub trait PageSource: Send {
    type Item: Send;

    /// Fetches the page identified by `token` (`None` for the first page).
    fn fetch_page(
        &mut self,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Page<Self::Item>, FetchError>> + Send;
}

/// Everything a [`Pager`] retrieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    pub items: Vec<T>,

    /// Whether the item cap stopped the retrieval before the remote list was exhausted.
    pub truncated: bool,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// A lazy, finite sequence of remote items, pulled page by page.
pub struct Pager<S: PageSource> {
    source: S,
    cursor: Cursor,
    buffer: VecDeque<S::Item>,
    max_items: Option<usize>,
    yielded: usize,
    pages: usize,
    truncated: bool,
}

impl<S: PageSource> Pager<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cursor: Cursor::Start,
            buffer: VecDeque::new(),
            max_items: None,
            yielded: 0,
            pages: 0,
            truncated: false,
        }
    }

    /// Stops the sequence after `max_items` items.
    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    fn cap_reached(&self) -> bool {
        self.max_items.is_some_and(|max| self.yielded >= max)
    }

    /// Returns the next item, fetching another page when the current one runs out.
    ///
    /// After an error the pager is finished and keeps returning `Ok(None)`.
    pub async fn next(&mut self) -> Result<Option<S::Item>, FetchError> {
        loop {
            if self.cap_reached() {
                // a cap hit before the first page leaves the list unread, which counts too
                if !self.buffer.is_empty() || !matches!(self.cursor, Cursor::Done) {
                    self.truncated = true;
                    debug!(
                        max_items = self.yielded,
                        "Reached the item cap before the end of the list"
                    );
                }

                self.buffer.clear();
                self.cursor = Cursor::Done;

                return Ok(None);
            }

            if let Some(item) = self.buffer.pop_front() {
                self.yielded += 1;

                return Ok(Some(item));
            }

            let token = match &self.cursor {
                Cursor::Start => None,
                Cursor::Next(token) => Some(token.as_str()),
                Cursor::Done => return Ok(None),
            };

            trace!(page = self.pages + 1, ?token, "Requesting a page");
            let page = match self.source.fetch_page(token).await {
                Ok(page) => page,

                Err(e) => {
                    self.cursor = Cursor::Done;

                    return Err(e);
                }
            };
            self.pages += 1;

            self.cursor = match page.next_page_token {
                Some(token) if !token.is_empty() => Cursor::Next(token),
                _ => Cursor::Done,
            };
            self.buffer.extend(page.items);
        }
    }

    /// Drains the sequence.
    pub async fn collect(mut self) -> Result<Fetched<S::Item>, FetchError> {
        let mut items = Vec::new();

        while let Some(item) = self.next().await? {
            items.push(item);
        }

        Ok(Fetched {
            items,
            truncated: self.truncated,
        })
    }
}
