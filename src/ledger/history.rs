// History - lazy, paginated, newest-first view of one account's transactions

use crate::ledger::{LedgerError, Transaction};
use crate::primitives::{AccountOwner, Currency};
use crate::storage::LedgerStore;
use std::collections::VecDeque;
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Iterator over an account's transactions, fetched from storage a page at a time.
///
/// Transactions committed after iteration started are not yielded until
/// [`History::restart`] is called.
pub struct History {
    store: Arc<LedgerStore>,
    owner: AccountOwner,
    currency: Currency,
    page_size: usize,
    cursor: Option<Vec<u8>>,
    buffer: VecDeque<Transaction>,
    started: bool,
    exhausted: bool,
}

impl History {
    pub(crate) fn new(store: Arc<LedgerStore>, owner: AccountOwner, currency: Currency) -> Self {
        Self {
            store,
            owner,
            currency,
            page_size: DEFAULT_PAGE_SIZE,
            cursor: None,
            buffer: VecDeque::new(),
            started: false,
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Start again from the newest transaction
    pub fn restart(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.started = false;
        self.exhausted = false;
    }

    /// Fetch the next page directly; empty once history is exhausted
    pub fn next_page(&mut self) -> Result<Vec<Transaction>, LedgerError> {
        if !self.buffer.is_empty() {
            return Ok(self.buffer.drain(..).collect());
        }
        if self.exhausted {
            return Ok(Vec::new());
        }

        let cursor = if self.started { self.cursor.as_deref() } else { None };
        let page = self
            .store
            .history_page(&self.owner, self.currency, cursor, self.page_size)?;
        self.started = true;
        self.exhausted = page.next_cursor.is_none();
        self.cursor = page.next_cursor;
        Ok(page.transactions)
    }
}

impl Iterator for History {
    type Item = Result<Transaction, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            match self.next_page() {
                Ok(page) => self.buffer.extend(page),
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
