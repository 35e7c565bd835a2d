use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{
    errors::{Error as JwtError, ErrorKind as JwtErrorKind},
    DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use rocket::{
    http::{Cookie, SameSite, Status},
    request::{self, FromRequest},
    Request, State,
};
use serde::{Deserialize, Serialize};
use time;

use crate::config::Config;
use crate::model::mongodb::Id;
use crate::model::user::User;

use super::user::{Access, Rights};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// An authentication token representing a specific user with specific rights.
#[derive(Serialize, Deserialize)]
pub struct AuthToken<U> {
    id: Id,
    #[serde(rename = "rgt")]
    rights: Rights,
    #[serde(skip)]
    phantom: PhantomData<U>,
}

impl<U> AuthToken<U> {
    /// Get the user ID.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Get the user's rights.
    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Does this token grant at least the given rights?
    pub fn permits(&self, target: Rights) -> bool {
        self.rights >= target
    }
}

impl<U> AuthToken<U>
where
    U: Access,
{
    /// Create a new [`AuthToken`] for the given user.
    pub fn new(user: &User) -> Self {
        Self {
            id: user.id,
            rights: user.role,
            phantom: PhantomData,
        }
    }

    /// Serialize this token into a cookie.
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + config.auth_ttl(),
        };

        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .unwrap(); // Infallible.

        Cookie::build((AUTH_TOKEN_COOKIE, token))
            .max_age(time::Duration::seconds(config.auth_ttl().num_seconds()))
            .same_site(SameSite::Strict)
            .build()
    }

    /// Deserialize a token from a cookie.
    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, JwtError> {
        jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims<U>>| claims.claims.token)
    }
}

/// Cookie claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims<U> {
    #[serde(flatten, bound = "")]
    token: AuthToken<U>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: Access,
{
    type Error = JwtError;

    /// Get an AuthToken from the cookie and verify that it grants the rights
    /// this endpoint demands.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config = match req.guard::<&State<Config>>().await {
            request::Outcome::Success(config) => config,
            // Valid as `Config` is always managed.
            _ => return request::Outcome::Forward(Status::InternalServerError),
        };

        let cookie = match req.cookies().get(AUTH_TOKEN_COOKIE) {
            Some(cookie) => cookie,
            None => {
                return request::Outcome::Error((
                    Status::Unauthorized,
                    JwtErrorKind::InvalidToken.into(),
                ))
            }
        };

        match Self::from_cookie(cookie, config) {
            Ok(token) if token.permits(U::RIGHTS) => request::Outcome::Success(token),
            Ok(_) => request::Outcome::Error((
                Status::Forbidden,
                JwtErrorKind::InvalidToken.into(),
            )),
            Err(err) => request::Outcome::Error((Status::Unauthorized, err)),
        }
    }
}
