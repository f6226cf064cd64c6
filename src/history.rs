//! Monthly history rollups.
//!
//! A history request covers `months_back + 1` calendar months ending with the
//! month of the reference date. The current month is reported on its own;
//! the preceding months form `history`, oldest first. A month whose metric
//! fails is logged and reported as `0.0` so one bad month never drops the
//! rest of the window.

use chrono::{Datelike, Months, NaiveDate};
use serde_json::json;
use tracing::debug;

use crate::error::AnalyticsError;
use crate::metrics::MetricKind;
use crate::models::{CourseKey, HistoryEntry, MetricWindow, MonthlyHistory, Site};
use crate::pipeline_log::{ErrorLog, PipelineErrorKind};
use crate::sites::{SiteResolver, SiteScope};

pub const FAILED_MONTH_VALUE: f64 = 0.0;

pub fn month_start(date: NaiveDate) -> Result<NaiveDate, AnalyticsError> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .ok_or(AnalyticsError::DateOutOfRange(date))
}

/// Calendar months from `months_back` months before `date_for` up to and
/// including the month of `date_for`, oldest first.
pub fn month_windows(
    date_for: NaiveDate,
    months_back: u32,
) -> Result<Vec<MetricWindow>, AnalyticsError> {
    let current = month_start(date_for)?;
    (0..=months_back)
        .rev()
        .map(|offset| -> Result<MetricWindow, AnalyticsError> {
            let start = current
                .checked_sub_months(Months::new(offset))
                .ok_or(AnalyticsError::DateOutOfRange(date_for))?;
            let end = start
                .checked_add_months(Months::new(1))
                .ok_or(AnalyticsError::DateOutOfRange(date_for))?;
            Ok(MetricWindow { start, end })
        })
        .collect()
}

/// Runs `func` once per month. Only fatal errors (misconfiguration) or an
/// unrepresentable reference date abort the rollup. `metric` names the
/// measurement in error log context.
pub fn get_monthly_history_metric<F>(
    site: &Site,
    entity_id: &str,
    metric: &str,
    func: F,
    date_for: NaiveDate,
    months_back: u32,
    error_log: &ErrorLog,
) -> Result<MonthlyHistory, AnalyticsError>
where
    F: Fn(&Site, NaiveDate, NaiveDate) -> Result<f64, AnalyticsError>,
{
    let mut windows = month_windows(date_for, months_back)?;
    let current_window = windows.pop().ok_or(AnalyticsError::DateOutOfRange(date_for))?;

    let target = MonthTarget {
        site,
        entity_id,
        metric,
    };
    let mut history = Vec::with_capacity(windows.len());
    for window in windows {
        let value = month_value(&target, &func, window, error_log)?;
        history.push(HistoryEntry {
            period: window.period_label(),
            value,
        });
    }
    let current_month = month_value(&target, &func, current_window, error_log)?;

    debug!(
        site = %site.domain,
        entity_id,
        metric,
        months = history.len() + 1,
        "computed monthly history"
    );
    Ok(MonthlyHistory {
        current_month,
        history,
    })
}

struct MonthTarget<'a> {
    site: &'a Site,
    entity_id: &'a str,
    metric: &'a str,
}

fn month_value<F>(
    target: &MonthTarget<'_>,
    func: &F,
    window: MetricWindow,
    error_log: &ErrorLog,
) -> Result<f64, AnalyticsError>
where
    F: Fn(&Site, NaiveDate, NaiveDate) -> Result<f64, AnalyticsError>,
{
    let err = match func(target.site, window.start, window.end) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    let context = json!({
        "site": target.site.domain,
        "entity_id": target.entity_id,
        "metric": target.metric,
        "period": window.period_label(),
        "start_date": window.start.to_string(),
        "end_date": window.end.to_string(),
        "error": err.to_string(),
    });
    if err.is_fatal() {
        error_log.log_error(
            PipelineErrorKind::Misconfiguration,
            "Monthly metric aborted",
            context,
        );
        return Err(err);
    }
    error_log.log_error(
        PipelineErrorKind::UnspecifiedData,
        "Unable to compute monthly metric",
        context,
    );
    Ok(FAILED_MONTH_VALUE)
}

/// Binds a course metric to one course and rolls it up by month.
pub fn get_course_history_metric(
    resolver: &SiteResolver<'_>,
    scope: &SiteScope<'_>,
    course_id: &CourseKey,
    kind: MetricKind,
    date_for: NaiveDate,
    months_back: u32,
    error_log: &ErrorLog,
) -> Result<MonthlyHistory, AnalyticsError> {
    let func = kind.function();
    get_monthly_history_metric(
        scope.site,
        &course_id.to_string(),
        kind.name(),
        |_, start_date, end_date| func(resolver, scope, course_id, start_date, end_date),
        date_for,
        months_back,
        error_log,
    )
}
