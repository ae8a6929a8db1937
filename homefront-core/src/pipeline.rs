// Per-target pipeline: collect, filter, geolocate, probe, aggregate

use crate::context::RunContext;
use crate::report::{CollectionInfo, DomainDetail, ErrorResult, TargetResult};
use chrono::Utc;
use futures::future::join_all;
use homefront_scanner::ScanError;
use homefront_scanner::aggregate::{classify, summarize};
use homefront_scanner::collector::detect_challenge;
use homefront_scanner::retry::{collect_with_fallback, www_variant};
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Tagged outcome of one target. Errors are data, never panics or early exits.
pub type TargetOutcomeResult = std::result::Result<TargetResult, ErrorResult>;

pub async fn check_target(ctx: &RunContext, url: &str) -> TargetOutcomeResult {
    let started = Instant::now();
    let elapsed = || started.elapsed().as_millis() as u64;
    let fail = |error: ScanError| {
        ErrorResult::from_error(url, &error, ctx.parameters.clone()).with_duration(elapsed())
    };

    let hostname = Url::parse(url)
        .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))
        .and_then(|u| {
            u.host_str()
                .map(|h| h.to_ascii_lowercase())
                .ok_or_else(|| ScanError::InvalidUrl(format!("{} has no host", url)))
        })
        .map_err(fail)?;

    let outcome = collect_with_fallback(
        ctx.collector.as_ref(),
        url,
        ctx.config.headless,
        ctx.config.timeout,
    )
    .await
    .map_err(|e| {
        ErrorResult::from_fallback(url, &e, ctx.parameters.clone()).with_duration(elapsed())
    })?;
    let page = &outcome.page;

    if let Some(challenge) = detect_challenge(&page.requests) {
        warn!("Anti-bot challenge on {}", url);
        return Err(fail(ScanError::ChallengeDetected(challenge.url.clone())));
    }

    let domains = ctx.filter.filter(&page.requests, &hostname).map_err(fail)?;
    debug!("{}: {} requests, {} domains", url, page.requests.len(), domains.len());

    let names: Vec<&str> = domains.iter().map(|d| d.hostname.as_str()).collect();
    let geos = ctx.geo.resolve_all(&names).await;

    let verdicts = join_all(geos.iter().map(|geo| {
        let headers = page.headers_for_host(&geo.domain);
        async move { ctx.cloud.classify(geo, &headers).await }
    }))
    .await;

    let jurisdiction = ctx.cloud.jurisdiction();
    let details: Vec<DomainDetail> = domains
        .into_iter()
        .zip(geos)
        .zip(verdicts)
        .map(|((domain, geo), cloud)| {
            let classification = classify(&geo, cloud.as_ref(), &ctx.registry, jurisdiction);
            DomainDetail {
                domain: domain.hostname,
                request_url: domain.request.url,
                resource_type: domain.request.resource_type,
                geo,
                cloud,
                classification,
            }
        })
        .collect();

    let summary = summarize(details.iter().filter_map(|d| d.classification.as_ref()));
    let resilient = summary.is_resilient();
    info!(
        "{}: domestic {}/{} foreign {}/{} resilient={}",
        url,
        summary.domestic.cloud,
        summary.domestic.direct,
        summary.foreign.cloud,
        summary.foreign.direct,
        resilient
    );

    Ok(TargetResult {
        url: url.to_string(),
        hostname,
        hostname_is_top_level: www_variant(url).is_some(),
        canonical_url: page
            .canonical_url
            .clone()
            .unwrap_or_else(|| outcome.url_used.clone()),
        timestamp: Utc::now(),
        duration_ms: elapsed(),
        parameters: ctx.parameters.clone(),
        environment: ctx.environment.clone(),
        collection: CollectionInfo {
            mode: outcome.state,
            attempts: outcome.attempts,
            url_used: outcome.url_used.clone(),
            http_status: page.http_status,
            failures: outcome.failures.clone(),
        },
        request_count: page.requests.len(),
        domain_count: details.len(),
        summary,
        resilient,
        domains: details,
    })
}

/// Persist a pipeline outcome when the context has a result store.
pub fn persist_outcome(ctx: &RunContext, outcome: &TargetOutcomeResult) -> std::io::Result<()> {
    let Some(store) = &ctx.store else {
        return Ok(());
    };
    match outcome {
        Ok(result) => store.save_success(result).map(|_| ()),
        Err(error) => store.save_error(error).map(|_| ()),
    }
}
