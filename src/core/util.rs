use std::sync::{Mutex, MutexGuard};

use http::{Method, StatusCode};

use crate::headers::Headers;
use crate::url::UrlInfo;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn is_redirect_status(status: StatusCode) -> bool {
    status.is_redirection()
}

/// Redirect targets are either path-only (resolved against the current
/// origin, preserving scheme/host/port) or taken as absolute URLs.
pub(crate) fn resolve_location(current: &UrlInfo, location: &str) -> String {
    if location.starts_with('/') {
        let default_port = if current.is_secure { 443 } else { 80 };
        if current.port == default_port {
            format!("{}://{}{location}", current.scheme, current.host)
        } else {
            format!("{}://{}:{}{location}", current.scheme, current.host, current.port)
        }
    } else {
        location.to_owned()
    }
}

/// The method carried across a redirect hop: HEAD stays HEAD, everything
/// else becomes GET.
pub(crate) fn redirect_method(method: &Method) -> Method {
    if *method == Method::HEAD {
        Method::HEAD
    } else {
        Method::GET
    }
}

/// Drops body-describing headers (the follow-up request never carries a
/// body), any pinned Host (it must track the hop target), and, on
/// cross-origin hops, credential-bearing ones.
pub(crate) fn sanitize_headers_for_redirect(headers: &mut Headers, same_origin: bool) {
    headers.remove("host");
    headers.remove("content-length");
    headers.remove("content-type");
    if !same_origin {
        headers.remove("authorization");
        headers.remove("proxy-authorization");
        headers.remove("cookie");
    }
}

pub(crate) fn same_origin(left: &UrlInfo, right: &UrlInfo) -> bool {
    left.scheme == right.scheme
        && left.host.eq_ignore_ascii_case(&right.host)
        && left.port == right.port
}
