use crate::error::{GatewayError, Result};
use reqwest::header::LOCATION;
use reqwest::{Client, Request, Response, StatusCode};
use url::Url;

/// Redirect budget per upstream request.
pub const MAX_REDIRECTS: usize = 5;

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
    )
}

/// Dispatch `request`, resolving 3xx responses internally.
///
/// Each redirect is re-issued with the original method and the original
/// headers (Authorization included, so auth survives CDN hops) and no
/// body; upstream registries only redirect body-less blob GETs. The final
/// non-redirect response is returned as-is so its headers describe the
/// artifact, not the redirect. Once the budget is exhausted the last
/// upstream response is returned unchanged.
pub async fn send_following_redirects(client: &Client, request: Request) -> Result<Response> {
    let method = request.method().clone();
    let headers = request.headers().clone();
    let mut url: Url = request.url().clone();

    let mut request = request;
    let mut dispatched = 0;
    loop {
        let response = client.execute(request).await?;
        dispatched += 1;
        if !is_redirect(response.status()) || dispatched >= MAX_REDIRECTS {
            return Ok(response);
        }

        let location = match response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
        {
            Some(location) => location.to_string(),
            None => return Ok(response),
        };
        let next = url.join(&location).map_err(|e| {
            GatewayError::Registry(format!("invalid redirect location {}: {}", location, e))
        })?;
        tracing::debug!(from = %url, to = %next, status = %response.status(), "following upstream redirect");

        url = next.clone();
        request = client
            .request(method.clone(), next)
            .headers(headers.clone())
            .build()?;
    }
}
