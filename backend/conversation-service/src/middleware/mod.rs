//! Session resolution middleware.
//!
//! Every request gets an optional [`Actor`]: a verified bearer session
//! becomes `Actor::User`, an `X-Client-Id` header becomes `Actor::Guest`.
//! A bearer token that fails verification rejects the request with 401.
use crate::domain::Actor;
use crate::error::LedgerError;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

pub const CLIENT_ID_HEADER: &str = "X-Client-Id";
pub const MAX_CLIENT_ID_LEN: usize = 128;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Opaque session identity
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 keys for session tokens
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl SessionKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn issue(&self, session: &str, ttl: chrono::Duration) -> Result<String, LedgerError> {
        let now = chrono::Utc::now();
        let claims = SessionClaims {
            sub: session.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| LedgerError::Internal(format!("failed to sign session token: {}", e)))
    }

    /// Returns the session identity carried by a valid token
    pub fn verify(&self, token: &str) -> Result<String, LedgerError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!("session token rejected: {}", e);
            LedgerError::Unauthenticated("invalid or expired session token".to_string())
        })?;

        if data.claims.sub.trim().is_empty() {
            return Err(LedgerError::Unauthenticated(
                "session token has no subject".to_string(),
            ));
        }
        Ok(data.claims.sub)
    }
}

/// Actor resolved for the current request, stored in request extensions
#[derive(Debug, Clone)]
struct ResolvedActor(Option<Actor>);

fn resolve_actor(req: &ServiceRequest, keys: Option<&SessionKeys>) -> Result<Option<Actor>, LedgerError> {
    if let Some(header) = req.headers().get("Authorization") {
        let value = header.to_str().map_err(|_| {
            LedgerError::Unauthenticated("malformed Authorization header".to_string())
        })?;
        let token = value.strip_prefix("Bearer ").ok_or_else(|| {
            LedgerError::Unauthenticated("invalid Authorization header format".to_string())
        })?;
        let keys = keys.ok_or_else(|| {
            LedgerError::Unauthenticated("session authentication is not configured".to_string())
        })?;
        return keys.verify(token.trim()).map(|session| Some(Actor::User(session)));
    }

    match req.headers().get(CLIENT_ID_HEADER) {
        None => Ok(None),
        Some(header) => {
            let client_id = header
                .to_str()
                .map_err(|_| LedgerError::InvalidInput("malformed X-Client-Id header".to_string()))?
                .trim();
            if client_id.is_empty() {
                return Ok(None);
            }
            if client_id.len() > MAX_CLIENT_ID_LEN {
                return Err(LedgerError::InvalidInput(format!(
                    "X-Client-Id too long (max {} characters)",
                    MAX_CLIENT_ID_LEN
                )));
            }
            Ok(Some(Actor::Guest(client_id.to_string())))
        }
    }
}

/// Resolves the request actor before handlers run
#[derive(Clone)]
pub struct SessionMiddleware {
    keys: Option<Arc<SessionKeys>>,
}

impl SessionMiddleware {
    pub fn new(keys: Option<Arc<SessionKeys>>) -> Self {
        Self { keys }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = SessionMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionMiddlewareService {
            service: Rc::new(service),
            keys: self.keys.clone(),
        }))
    }
}

pub struct SessionMiddlewareService<S> {
    service: Rc<S>,
    keys: Option<Arc<SessionKeys>>,
}

impl<S, B> Service<ServiceRequest> for SessionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        let actor = match resolve_actor(&req, self.keys.as_deref()) {
            Ok(actor) => actor,
            Err(err) => {
                let response = req.error_response(err).map_into_right_body();
                return Box::pin(async move { Ok(response) });
            }
        };
        req.extensions_mut().insert(ResolvedActor(actor));

        Box::pin(async move {
            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}

/// Optional actor for the current request
#[derive(Debug, Clone)]
pub struct MaybeActor(pub Option<Actor>);

impl MaybeActor {
    pub fn actor(&self) -> Option<&Actor> {
        self.0.as_ref()
    }
}

impl FromRequest for MaybeActor {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let actor = req
            .extensions()
            .get::<ResolvedActor>()
            .and_then(|resolved| resolved.0.clone());
        ready(Ok(MaybeActor(actor)))
    }
}
