use log::{debug, info};
use tokio::sync::Mutex;

use crate::error::TrackerError;
use crate::store::{EntryQuery, EntryRepository};
use crate::time_entry::{EntryCursor, EntryFilters, TimeEntry};

/// 1ページに表示するエントリー数。前後どちらへの移動でも同じ値を使う。
pub const PAGE_SIZE: usize = 5;

/// 表示中の1ページ。
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub entries: Vec<TimeEntry>,
    /// 1始まりのページ番号。
    pub number: usize,
    pub has_previous: bool,
    pub has_next: bool,
}

/// ページ読み込み要求の結果。
#[derive(Clone, Debug, PartialEq)]
pub enum PageLoad {
    Loaded(Page),
    /// 移動できる方向がないため何もしなかった。
    Unchanged,
    /// 別の読み込みが実行中のため無視した。
    Busy,
}

#[derive(Debug, Default)]
struct BrowserState {
    filters: EntryFilters,
    /// 表示中より前の各ページの末尾カーソル。末尾が表示中ページの開始位置になる。
    history: Vec<EntryCursor>,
    page_end: Option<EntryCursor>,
    has_next: bool,
    page: Option<Page>,
}

/// タイムエントリーを新しい順にページ単位で閲覧する。
///
/// 全件は読み込まず、カーソルを使った範囲クエリで1ページずつ取得する。
/// 状態は1つのロックの中にあり、ロックが取れないときの要求は`PageLoad::Busy`として無視される。
/// 取得に失敗した場合は表示中のページとカーソルをそのまま残す。
pub struct EntryBrowser<'a, R: EntryRepository + ?Sized> {
    repository: &'a R,
    company_id: String,
    page_size: usize,
    state: Mutex<BrowserState>,
}

impl<'a, R: EntryRepository + ?Sized> EntryBrowser<'a, R> {
    /// 新しい`EntryBrowser`を返す。
    ///
    /// # Arguments
    ///
    /// * `repository` - エントリーを保持するドキュメントストア
    /// * `company_id` - 閲覧する会社のID
    pub fn new(repository: &'a R, company_id: &str) -> Self {
        Self {
            repository,
            company_id: company_id.to_string(),
            page_size: PAGE_SIZE,
            state: Mutex::new(BrowserState::default()),
        }
    }

    /// 最後に読み込んだページ。
    pub async fn current_page(&self) -> Option<Page> {
        self.state.lock().await.page.clone()
    }

    /// 履歴を捨てて最初のページを読み込む。
    pub async fn load_first_page(&self, filters: EntryFilters) -> Result<PageLoad, TrackerError> {
        let Ok(mut state) = self.state.try_lock() else {
            debug!("Ignoring first page request, a load is in flight");
            return Ok(PageLoad::Busy);
        };
        self.fetch(&mut state, filters, Vec::new()).await
    }

    /// 次のページを読み込む。
    ///
    /// 初期化前や、先読みで次のエントリーがないと分かっている場合は何もしない。
    pub async fn load_next_page(&self) -> Result<PageLoad, TrackerError> {
        let Ok(mut state) = self.state.try_lock() else {
            debug!("Ignoring next page request, a load is in flight");
            return Ok(PageLoad::Busy);
        };
        let Some(page_end) = state.page_end.clone() else {
            return Ok(PageLoad::Unchanged);
        };
        if !state.has_next {
            return Ok(PageLoad::Unchanged);
        }

        let mut history = state.history.clone();
        history.push(page_end);
        let filters = state.filters.clone();
        self.fetch(&mut state, filters, history).await
    }

    /// 前のページを読み込む。最初のページでは何もしない。
    pub async fn load_previous_page(&self) -> Result<PageLoad, TrackerError> {
        let Ok(mut state) = self.state.try_lock() else {
            debug!("Ignoring previous page request, a load is in flight");
            return Ok(PageLoad::Busy);
        };
        if state.history.is_empty() {
            return Ok(PageLoad::Unchanged);
        }

        let mut history = state.history.clone();
        history.pop();
        let filters = state.filters.clone();
        self.fetch(&mut state, filters, history).await
    }

    /// `history`の末尾の直後から1ページ取得し、成功した場合だけ状態を置き換える。
    async fn fetch(
        &self,
        state: &mut BrowserState,
        filters: EntryFilters,
        history: Vec<EntryCursor>,
    ) -> Result<PageLoad, TrackerError> {
        let query = EntryQuery {
            company_id: self.company_id.clone(),
            filters: filters.clone(),
            start_after: history.last().cloned(),
            limit: self.page_size,
        };
        let entries = self.repository.query_entries(&query).await?;
        let page_end = entries.last().map(TimeEntry::cursor);

        // 件数がページサイズに満たなければ末尾なので先読みしない
        let has_next = match &page_end {
            Some(cursor) if entries.len() >= self.page_size => {
                let lookahead = EntryQuery {
                    start_after: Some(cursor.clone()),
                    limit: 1,
                    ..query
                };
                !self.repository.query_entries(&lookahead).await?.is_empty()
            }
            _ => false,
        };

        let page = Page {
            number: history.len() + 1,
            has_previous: !history.is_empty(),
            has_next,
            entries,
        };
        info!(
            "Loaded page {} with {} entries (next: {})",
            page.number,
            page.entries.len(),
            page.has_next
        );

        *state = BrowserState {
            filters,
            history,
            page_end,
            has_next,
            page: Some(page.clone()),
        };

        Ok(PageLoad::Loaded(page))
    }
}
