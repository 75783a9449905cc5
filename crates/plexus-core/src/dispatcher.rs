use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use plexus_common::{ApiType, RequestContext};
use plexus_config::{ConfigSnapshot, ConfigHandle, ModelConfig, ProviderConfig};
use plexus_routing::{
    CooldownManager, MetricsCollector, RateLimitParserRegistry, RequestMetrics, RouteResult,
    Router, parse_retry_after,
};
use plexus_transform::{
    CompletedResponse, PlexusMeta, PricingSnapshot, TransformerRegistry, UnifiedRequest,
    stream::StreamTranslator,
};

use crate::error::{DispatchError, RoutingContext};
use crate::headers::{build_headers, sanitize_headers};
use crate::now_ms;
use crate::upstream::{NetworkError, UpstreamBody, UpstreamClient, UpstreamRequest};
use crate::usage::UsageLogger;

/// Result of a dispatched request.
pub enum DispatchOutcome {
    Unary {
        status: u16,
        /// Response body already rendered in the client's dialect (or the
        /// untouched upstream body on the pass-through path).
        body: JsonValue,
        /// Unified view, for callers that want the parsed form.
        response: CompletedResponse,
    },
    /// Non-JSON upstream payload (synthesized audio), relayed as-is.
    Binary {
        status: u16,
        content_type: String,
        body: Bytes,
    },
    Stream(StreamHandle),
}

/// A live translated byte stream for the client.
pub struct StreamHandle {
    pub content_type: &'static str,
    pub receiver: mpsc::Receiver<Result<Bytes, std::io::Error>>,
}

/// Orchestrates router + transformers + upstream call + failover for one
/// request at a time. All services are injected; the dispatcher holds no
/// per-request state.
pub struct Dispatcher {
    config: ConfigHandle,
    router: Arc<Router>,
    cooldowns: Arc<CooldownManager>,
    metrics: Arc<MetricsCollector>,
    transformers: TransformerRegistry,
    ratelimits: RateLimitParserRegistry,
    client: Arc<dyn UpstreamClient>,
    usage: Arc<UsageLogger>,
}

/// Statuses that put a target on cooldown, independent of retryability.
fn cooldown_worthy(status: u16) -> bool {
    matches!(status, 401 | 403 | 408 | 429) || status >= 500
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConfigHandle,
        router: Arc<Router>,
        cooldowns: Arc<CooldownManager>,
        metrics: Arc<MetricsCollector>,
        transformers: TransformerRegistry,
        ratelimits: RateLimitParserRegistry,
        client: Arc<dyn UpstreamClient>,
        usage: Arc<UsageLogger>,
    ) -> Self {
        Self {
            config,
            router,
            cooldowns,
            metrics,
            transformers,
            ratelimits,
            client,
            usage,
        }
    }

    pub async fn dispatch(
        &self,
        unified: UnifiedRequest,
        mut ctx: RequestContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let snapshot = self.config.snapshot();
        let incoming = unified.incoming_api_type.unwrap_or(ctx.client_api_type);
        ctx.streaming = unified.stream;

        let candidates = self
            .router
            .resolve_candidates(&unified.model, Some(incoming), Some(&unified))
            .await
            .map_err(|err| {
                debug!(event = "route_failed", model = %unified.model, error = %err);
                DispatchError::Route(err)
            })?;
        ctx.alias_used = candidates[0]
            .alias
            .clone()
            .or_else(|| Some(unified.model.clone()));

        let failover = &snapshot.failover;
        let max_attempts = if failover.enabled {
            failover
                .max_attempts
                .map(|n| n as usize)
                .unwrap_or(candidates.len())
                .max(1)
        } else {
            1
        };

        let mut attempted: Vec<String> = Vec::new();
        let mut last_failure: Option<(RoutingContext, String)> = None;

        for candidate in candidates.iter().take(max_attempts) {
            let attempt_started = Instant::now();
            let prepared =
                self.prepare_attempt(&snapshot, &unified, candidate, incoming, &mut ctx)?;
            attempted.push(format!("{}/{}", candidate.provider, candidate.model));
            let attempt_count = attempted.len() as u32;

            info!(
                event = "upstream_attempt",
                request_id = %ctx.id,
                provider = %candidate.provider,
                model = %candidate.model,
                api_type = %prepared.target_api,
                attempt = attempt_count,
                passthrough = prepared.passthrough,
                stream = unified.stream
            );

            let result = self
                .client
                .send(UpstreamRequest {
                    url: prepared.url.clone(),
                    headers: prepared.headers.clone(),
                    body: prepared.body.clone(),
                    stream: unified.stream,
                })
                .await;

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    self.record_failure(&candidate.provider, attempt_started);
                    self.cooldowns
                        .mark_failure(&candidate.provider, &candidate.model, None)
                        .await;
                    let context = prepared.routing_context(
                        candidate,
                        None,
                        Some(err.to_string()),
                        attempt_count,
                        attempted.clone(),
                    );
                    let retryable = failover.enabled
                        && failover.retryable_errors.iter().any(|e| e == err.kind.code());
                    warn!(
                        event = "upstream_network_error",
                        request_id = %ctx.id,
                        provider = %candidate.provider,
                        code = err.kind.code(),
                        retryable,
                        error = %err
                    );
                    last_failure = Some((context, err.to_string()));
                    if retryable {
                        continue;
                    }
                    break;
                }
            };

            if !(200..300).contains(&response.status) {
                let status = response.status;
                let retry_after = response.header("retry-after").map(str::to_string);
                let body_text = match response.body {
                    UpstreamBody::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    UpstreamBody::Stream(_) => String::new(),
                };
                self.record_failure(&candidate.provider, attempt_started);

                if cooldown_worthy(status) {
                    let duration_ms = if status == 429 {
                        // Retry-After header wins, then the body parser,
                        // then the exponential default.
                        retry_after
                            .as_deref()
                            .and_then(parse_retry_after)
                            .or_else(|| {
                                self.ratelimits.parse(&candidate.provider, &body_text)
                            })
                    } else {
                        None
                    };
                    self.cooldowns
                        .mark_failure(&candidate.provider, &candidate.model, duration_ms)
                        .await;
                }

                let context = prepared.routing_context(
                    candidate,
                    Some(status),
                    Some(body_text.clone()),
                    attempt_count,
                    attempted.clone(),
                );
                let retryable =
                    failover.enabled && failover.retryable_status_codes.contains(&status);
                warn!(
                    event = "upstream_error_status",
                    request_id = %ctx.id,
                    provider = %candidate.provider,
                    status,
                    retryable
                );
                if retryable {
                    last_failure = Some((context, format!("upstream returned {status}")));
                    continue;
                }
                // Non-retryable: relay immediately, exactly one fetch, no
                // further candidates.
                let err = DispatchError::Upstream {
                    status,
                    body: body_text,
                    context: Box::new(context),
                };
                self.usage
                    .log_error(&ctx, err.kind(), &err.to_string(), err.routing_context())
                    .await;
                return Err(err);
            }

            if !unified.stream {
                self.cooldowns
                    .mark_success(&candidate.provider, &candidate.model)
                    .await;
                return self.finish_unary(prepared, response, ctx).await;
            }

            // Streaming: hold off committing to this candidate until the
            // first byte arrives; nothing has reached the client yet, so a
            // failure here is still eligible for failover.
            let mut upstream = match response.body {
                UpstreamBody::Stream(receiver) => receiver,
                UpstreamBody::Bytes(_) => {
                    return Err(DispatchError::Internal(
                        "stream request answered with a buffered body".to_string(),
                    ));
                }
            };
            match upstream.recv().await {
                Some(Ok(first_chunk)) => {
                    self.cooldowns
                        .mark_success(&candidate.provider, &candidate.model)
                        .await;
                    ctx.provider_first_token = Some(Instant::now());
                    return self
                        .finish_stream(prepared, upstream, first_chunk, ctx)
                        .await;
                }
                first_failure => {
                    let message = match first_failure {
                        Some(Err(err)) => err.to_string(),
                        _ => "stream closed before first byte".to_string(),
                    };
                    self.record_failure(&candidate.provider, attempt_started);
                    self.cooldowns
                        .mark_failure(&candidate.provider, &candidate.model, None)
                        .await;
                    warn!(
                        event = "stream_failed_before_first_byte",
                        request_id = %ctx.id,
                        provider = %candidate.provider,
                        error = %message
                    );
                    let context = prepared.routing_context(
                        candidate,
                        None,
                        Some(message.clone()),
                        attempt_count,
                        attempted.clone(),
                    );
                    last_failure = Some((context, message));
                    if failover.enabled {
                        continue;
                    }
                    break;
                }
            }
        }

        let (context, message) = match last_failure {
            Some(failure) => failure,
            None => {
                return Err(DispatchError::Internal(
                    "no candidate could be attempted".to_string(),
                ));
            }
        };
        let err = DispatchError::Exhausted {
            message,
            context: Box::new(context),
        };
        self.usage
            .log_error(&ctx, err.kind(), &err.to_string(), err.routing_context())
            .await;
        Err(err)
    }

    /// Relay an opaque (non-JSON) body, e.g. a multipart transcription
    /// upload. No transformation; same routing, cooldown, and failover
    /// semantics as the JSON path.
    pub async fn relay_opaque(
        &self,
        api_type: ApiType,
        model: &str,
        body: Bytes,
        content_type: &str,
        mut ctx: RequestContext,
        rewrite: &(dyn Fn(&Bytes, &str) -> Bytes + Send + Sync),
    ) -> Result<DispatchOutcome, DispatchError> {
        let snapshot = self.config.snapshot();
        let candidates = self
            .router
            .resolve_candidates(model, Some(api_type), None)
            .await?;
        ctx.alias_used = candidates[0].alias.clone().or_else(|| Some(model.to_string()));
        ctx.streaming = false;
        ctx.passthrough = true;

        let failover = &snapshot.failover;
        let max_attempts = if failover.enabled {
            failover
                .max_attempts
                .map(|n| n as usize)
                .unwrap_or(candidates.len())
                .max(1)
        } else {
            1
        };

        let endpoint = match api_type {
            ApiType::Transcriptions => "/audio/transcriptions",
            ApiType::Speech => "/audio/speech",
            other => {
                return Err(DispatchError::Internal(format!(
                    "no opaque relay endpoint for {other}"
                )));
            }
        };

        let mut attempted: Vec<String> = Vec::new();
        let mut last_failure: Option<(RoutingContext, String)> = None;

        for candidate in candidates.iter().take(max_attempts) {
            let attempt_started = Instant::now();
            let provider = snapshot.provider(&candidate.provider).ok_or_else(|| {
                DispatchError::Internal(format!(
                    "provider `{}` vanished from config",
                    candidate.provider
                ))
            })?;
            let resolved = provider.api_base_url.resolve(api_type).ok_or_else(|| {
                DispatchError::Internal(format!(
                    "provider `{}` has no base url for {api_type}",
                    candidate.provider
                ))
            })?;
            let url = format!("{}{}", resolved.url, endpoint);
            let mut headers =
                build_headers(api_type, provider.api_key.as_deref(), false, &provider.headers);
            for entry in headers.iter_mut() {
                if entry.0 == "content-type" {
                    entry.1 = content_type.to_string();
                }
            }

            ctx.actual_provider = Some(candidate.provider.clone());
            ctx.actual_model = Some(candidate.model.clone());
            ctx.target_api_type = Some(api_type);
            attempted.push(format!("{}/{}", candidate.provider, candidate.model));
            let attempt_count = attempted.len() as u32;

            let result = self
                .client
                .send(UpstreamRequest {
                    url: url.clone(),
                    headers: headers.clone(),
                    body: rewrite(&body, &candidate.model),
                    stream: false,
                })
                .await;

            let make_context = |status: Option<u16>, response: Option<String>| RoutingContext {
                provider: candidate.provider.clone(),
                target_model: candidate.model.clone(),
                target_api_type: api_type,
                url: url.clone(),
                sanitized_headers: sanitize_headers(&headers),
                status_code: status,
                provider_response: response,
                attempt_count,
                all_attempted_providers: attempted.clone(),
            };

            match result {
                Err(err) => {
                    self.record_failure(&candidate.provider, attempt_started);
                    self.cooldowns
                        .mark_failure(&candidate.provider, &candidate.model, None)
                        .await;
                    let retryable = failover.enabled
                        && failover.retryable_errors.iter().any(|e| e == err.kind.code());
                    last_failure = Some((make_context(None, Some(err.to_string())), err.to_string()));
                    if retryable {
                        continue;
                    }
                    break;
                }
                Ok(response) if !(200..300).contains(&response.status) => {
                    let status = response.status;
                    let body_text = match response.body {
                        UpstreamBody::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                        UpstreamBody::Stream(_) => String::new(),
                    };
                    self.record_failure(&candidate.provider, attempt_started);
                    if cooldown_worthy(status) {
                        let duration_ms = (status == 429)
                            .then(|| self.ratelimits.parse(&candidate.provider, &body_text))
                            .flatten();
                        self.cooldowns
                            .mark_failure(&candidate.provider, &candidate.model, duration_ms)
                            .await;
                    }
                    let retryable =
                        failover.enabled && failover.retryable_status_codes.contains(&status);
                    if retryable {
                        last_failure = Some((
                            make_context(Some(status), Some(body_text.clone())),
                            format!("upstream returned {status}"),
                        ));
                        continue;
                    }
                    let err = DispatchError::Upstream {
                        status,
                        body: body_text.clone(),
                        context: Box::new(make_context(Some(status), Some(body_text))),
                    };
                    self.usage
                        .log_error(&ctx, err.kind(), &err.to_string(), err.routing_context())
                        .await;
                    return Err(err);
                }
                Ok(response) => {
                    self.cooldowns
                        .mark_success(&candidate.provider, &candidate.model)
                        .await;
                    let bytes = match response.body {
                        UpstreamBody::Bytes(bytes) => bytes,
                        UpstreamBody::Stream(_) => Bytes::new(),
                    };
                    let content_type = response
                        .header("content-type")
                        .unwrap_or("application/json")
                        .to_string();
                    return Ok(DispatchOutcome::Binary {
                        status: response.status,
                        content_type,
                        body: bytes,
                    });
                }
            }
        }

        let (context, message) = last_failure.ok_or_else(|| {
            DispatchError::Internal("no candidate could be attempted".to_string())
        })?;
        let err = DispatchError::Exhausted {
            message,
            context: Box::new(context),
        };
        self.usage
            .log_error(&ctx, err.kind(), &err.to_string(), err.routing_context())
            .await;
        Err(err)
    }

    fn record_failure(&self, provider: &str, attempt_started: Instant) {
        self.metrics.record(RequestMetrics {
            provider: provider.to_string(),
            timestamp_ms: now_ms(),
            success: false,
            latency_ms: attempt_started.elapsed().as_millis() as u64,
            ttft_ms: None,
            tokens_per_sec: None,
            cost_per_1m: None,
        });
    }

    fn prepare_attempt(
        &self,
        snapshot: &ConfigSnapshot,
        unified: &UnifiedRequest,
        candidate: &RouteResult,
        incoming: ApiType,
        ctx: &mut RequestContext,
    ) -> Result<PreparedAttempt, DispatchError> {
        let provider = snapshot.provider(&candidate.provider).ok_or_else(|| {
            DispatchError::Internal(format!("provider `{}` vanished from config", candidate.provider))
        })?;
        let model_config = provider.model(&candidate.model);

        let target_api = choose_target_api(provider, model_config, incoming);
        let transformer = self
            .transformers
            .get(target_api)
            .ok_or_else(|| DispatchError::Internal(format!("no transformer for {target_api}")))?;
        let client_transformer = self.transformers.get(incoming).ok_or_else(|| {
            DispatchError::Internal(format!("no transformer for {incoming}"))
        })?;

        let passthrough = incoming == target_api
            && provider.force_transformer.is_none()
            && unified.original_body.is_some();

        let mut attempt_request = unified.clone();
        attempt_request.model = candidate.model.clone();

        let mut payload = if passthrough {
            let mut body = unified
                .original_body
                .clone()
                .unwrap_or(JsonValue::Null);
            // Gemini carries the model in the URL; the other dialects put
            // it in the body.
            if target_api != ApiType::Gemini {
                if let Some(object) = body.as_object_mut() {
                    object.insert(
                        "model".to_string(),
                        JsonValue::String(candidate.model.clone()),
                    );
                }
            }
            body
        } else {
            transformer.render_request(&attempt_request)?
        };

        if let Some(extra) = provider.extra_body.as_ref().and_then(|e| e.as_object()) {
            if let Some(object) = payload.as_object_mut() {
                for (key, value) in extra {
                    object.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(metadata) = &unified.metadata {
            if matches!(target_api, ApiType::Chat | ApiType::Responses | ApiType::Messages) {
                if let Some(object) = payload.as_object_mut() {
                    object
                        .entry("metadata".to_string())
                        .or_insert_with(|| metadata.clone());
                }
            }
        }

        let resolved = provider.api_base_url.resolve(target_api).ok_or_else(|| {
            DispatchError::Internal(format!(
                "provider `{}` has no base url for {target_api}",
                candidate.provider
            ))
        })?;
        if resolved.fallback {
            warn!(
                event = "base_url_fallback",
                provider = %candidate.provider,
                api_type = %target_api,
                "no exact or default base url key; using first entry"
            );
        }
        let url = format!("{}{}", resolved.url, transformer.endpoint(&attempt_request));

        let headers = build_headers(
            target_api,
            provider.api_key.as_deref(),
            unified.stream,
            &provider.headers,
        );

        let body = serde_json::to_vec(&payload)
            .map(Bytes::from)
            .map_err(|err| DispatchError::Internal(format!("payload encode failed: {err}")))?;

        ctx.actual_provider = Some(candidate.provider.clone());
        ctx.actual_model = Some(candidate.model.clone());
        ctx.target_api_type = Some(target_api);
        ctx.passthrough = passthrough;

        let pricing = model_config
            .and_then(|m| m.pricing.as_ref())
            .and_then(|p| p.rates_for(0))
            .map(|rates| PricingSnapshot {
                input_per_1m: rates.input_per_1m,
                output_per_1m: rates.output_per_1m,
                cached_per_1m: rates.cached_per_1m,
                reasoning_per_1m: rates.reasoning_per_1m,
            });
        let plexus = PlexusMeta {
            provider: candidate.provider.clone(),
            model: candidate.model.clone(),
            api_type: target_api,
            pricing,
            provider_discount: provider.discount,
            canonical_model: candidate.alias.clone(),
        };

        Ok(PreparedAttempt {
            target_api,
            incoming,
            passthrough,
            url,
            headers,
            body,
            attempt_request,
            plexus,
            client_transformer,
            provider_transformer: transformer,
            include_usage: unified.include_usage,
        })
    }

    async fn finish_unary(
        &self,
        prepared: PreparedAttempt,
        response: crate::upstream::UpstreamResponse,
        mut ctx: RequestContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let bytes = match response.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(_) => {
                return Err(DispatchError::Internal(
                    "unary request answered with a stream body".to_string(),
                ));
            }
        };
        ctx.provider_first_token = Some(Instant::now());

        if prepared.target_api == ApiType::Speech {
            // Audio bytes, not JSON; the unified view exists only so the
            // usage logger writes a row.
            let parsed = prepared
                .provider_transformer
                .parse_response(&bytes, &prepared.attempt_request)?;
            ctx.client_first_token = Some(Instant::now());
            let metrics = self.usage.log_completion(&ctx, &parsed, false).await;
            self.metrics.record(metrics);
            let content_type = response
                .header("content-type")
                .unwrap_or("application/octet-stream")
                .to_string();
            return Ok(DispatchOutcome::Binary {
                status: response.status,
                content_type,
                body: bytes,
            });
        }

        let mut parsed = prepared
            .provider_transformer
            .parse_response(&bytes, &prepared.attempt_request)?;
        parsed.plexus = Some(prepared.plexus.clone());

        let body = if prepared.passthrough {
            // Bypass transformation; the parsed view exists only for usage.
            serde_json::from_slice(&bytes)
                .map_err(|err| DispatchError::Internal(format!("upstream body not JSON: {err}")))?
        } else {
            prepared.client_transformer.render_response(&parsed)?
        };
        ctx.client_first_token = Some(Instant::now());

        let metrics = self.usage.log_completion(&ctx, &parsed, false).await;
        self.metrics.record(metrics);
        info!(
            event = "request_completed",
            request_id = %ctx.id,
            provider = %prepared.plexus.provider,
            model = %prepared.plexus.model,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            elapsed_ms = ctx.start.elapsed().as_millis() as u64
        );

        Ok(DispatchOutcome::Unary {
            status: response.status,
            body,
            response: parsed,
        })
    }

    async fn finish_stream(
        &self,
        prepared: PreparedAttempt,
        mut upstream: mpsc::Receiver<Result<Bytes, NetworkError>>,
        first_chunk: Bytes,
        mut ctx: RequestContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut translator = if prepared.passthrough {
            StreamTranslator::passthrough(prepared.target_api)?
        } else {
            StreamTranslator::translating(
                prepared.target_api,
                prepared.incoming,
                prepared.include_usage,
            )?
        };

        self.usage.log_pending(&ctx).await;

        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
        let usage = self.usage.clone();
        let metrics = self.metrics.clone();
        let plexus = prepared.plexus.clone();

        tokio::spawn(async move {
            let mut client_connected = true;

            let out = translator.push(&first_chunk);
            if !out.is_empty() {
                ctx.client_first_token = Some(Instant::now());
                client_connected = tx.send(Ok(out)).await.is_ok();
            }

            let mut upstream_error: Option<NetworkError> = None;
            while client_connected {
                match upstream.recv().await {
                    Some(Ok(chunk)) => {
                        let out = translator.push(&chunk);
                        if out.is_empty() {
                            continue;
                        }
                        if ctx.client_first_token.is_none() {
                            ctx.client_first_token = Some(Instant::now());
                        }
                        client_connected = tx.send(Ok(out)).await.is_ok();
                    }
                    Some(Err(err)) => {
                        upstream_error = Some(err);
                        break;
                    }
                    None => break,
                }
            }

            let (tail, mut final_response) = translator.finish();
            final_response.plexus = Some(plexus.clone());
            if client_connected {
                if !tail.is_empty() && tx.send(Ok(tail)).await.is_err() {
                    client_connected = false;
                }
                if let Some(err) = upstream_error {
                    // Past first byte: no failover, surface on the stream.
                    warn!(
                        event = "stream_interrupted",
                        request_id = %ctx.id,
                        provider = %plexus.provider,
                        error = %err
                    );
                    let _ = tx.send(Err(std::io::Error::other(err.to_string()))).await;
                } else if client_connected {
                    info!(
                        event = "stream_completed",
                        request_id = %ctx.id,
                        provider = %plexus.provider,
                        model = %plexus.model,
                        output_tokens = final_response.usage.output_tokens,
                        elapsed_ms = ctx.start.elapsed().as_millis() as u64
                    );
                }
            }

            let record = usage.log_completion(&ctx, &final_response, true).await;
            metrics.record(record);
        });

        Ok(DispatchOutcome::Stream(StreamHandle {
            content_type: "text/event-stream",
            receiver: rx,
        }))
    }
}

/// Target API selection: `force_transformer`, else the incoming dialect
/// when the model/provider can serve it, else the first declared type.
fn choose_target_api(
    provider: &ProviderConfig,
    model_config: Option<&ModelConfig>,
    incoming: ApiType,
) -> ApiType {
    if let Some(forced) = provider.force_transformer {
        return forced;
    }
    if let Some(access_via) = model_config
        .and_then(|m| m.access_via.as_ref())
        .filter(|v| !v.is_empty())
    {
        if access_via.contains(&incoming) {
            return incoming;
        }
        debug!(
            event = "api_type_fallback",
            incoming = %incoming,
            chosen = %access_via[0],
            "incoming api type not in access_via"
        );
        return access_via[0];
    }
    let inferred = provider.inferred_api_types();
    if inferred.is_empty() || inferred.contains(&incoming) {
        return incoming;
    }
    debug!(
        event = "api_type_fallback",
        incoming = %incoming,
        chosen = %inferred[0],
        "incoming api type not served by provider base urls"
    );
    inferred[0]
}

struct PreparedAttempt {
    target_api: ApiType,
    incoming: ApiType,
    passthrough: bool,
    url: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    attempt_request: UnifiedRequest,
    plexus: PlexusMeta,
    client_transformer: Arc<dyn plexus_transform::DialectTransformer>,
    provider_transformer: Arc<dyn plexus_transform::DialectTransformer>,
    include_usage: bool,
}

impl PreparedAttempt {
    fn routing_context(
        &self,
        candidate: &RouteResult,
        status: Option<u16>,
        provider_response: Option<String>,
        attempt_count: u32,
        attempted: Vec<String>,
    ) -> RoutingContext {
        RoutingContext {
            provider: candidate.provider.clone(),
            target_model: candidate.model.clone(),
            target_api_type: self.target_api,
            url: self.url.clone(),
            sanitized_headers: sanitize_headers(&self.headers),
            status_code: status,
            provider_response,
            attempt_count,
            all_attempted_providers: attempted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_worthy_statuses() {
        for status in [401, 403, 408, 429, 500, 502, 503, 504, 521] {
            assert!(cooldown_worthy(status), "{status} should cool down");
        }
        for status in [400, 404, 413, 422, 451] {
            assert!(!cooldown_worthy(status), "{status} must not cool down");
        }
    }
}
