use anyhow::Context;

use crate::wire::{HistoryResponse, RawMessage};

use super::api::ChatApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Page 1: the fetched page becomes the whole sequence.
    Replace,
    /// Page > 1: older messages go after everything already loaded.
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
    pub merge: MergeMode,
}

/// One fetched page, still raw and in server (oldest-first) order.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub page: u32,
    pub raw_messages: Vec<RawMessage>,
    pub has_more: bool,
}

impl HistoryPage {
    pub fn from_response(page: u32, resp: HistoryResponse) -> Self {
        let has_more = match &resp.pagination {
            Some(p) => match (p.has_more, p.total_pages) {
                (Some(has_more), _) => has_more,
                (None, Some(total_pages)) => p.page.unwrap_or(page) < total_pages,
                (None, None) => false,
            },
            None => false,
        };
        Self {
            page,
            raw_messages: resp.messages,
            has_more,
        }
    }
}

/// Cursor state for one conversation's history. Holds no message content.
#[derive(Debug, Clone)]
pub struct PaginationController {
    page: u32,
    has_more: bool,
    page_size: u32,
}

impl PaginationController {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 0,
            has_more: false,
            page_size: page_size.max(1),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn first_page(&self) -> PageRequest {
        PageRequest {
            page: 1,
            limit: self.page_size,
            merge: MergeMode::Replace,
        }
    }

    pub fn next_page(&self) -> Option<PageRequest> {
        if !self.has_more {
            return None;
        }
        Some(PageRequest {
            page: self.page + 1,
            limit: self.page_size,
            merge: MergeMode::Append,
        })
    }

    pub fn record(&mut self, page: &HistoryPage) {
        self.page = page.page;
        self.has_more = page.has_more;
    }
}

/// Fetch one page of history. `has_more` comes from the server's pagination
/// metadata only; a short page does not by itself mean the end.
pub async fn fetch_page(
    api: &dyn ChatApi,
    conversation_id: &str,
    request: PageRequest,
) -> anyhow::Result<HistoryPage> {
    let resp = api
        .fetch_messages(conversation_id, request.page, request.limit)
        .await
        .with_context(|| format!("load page {} of conversation history", request.page))?;
    Ok(HistoryPage::from_response(request.page, resp))
}
