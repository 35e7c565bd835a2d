use rocket::{
    http::{Cookie, CookieJar},
    serde::json::Json,
    Route, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    auth::{AuthToken, Rights, Voter, AUTH_TOKEN_COOKIE},
    mongodb::ApiId,
    user::{NewUser, User},
};
use crate::store::{SharedStore, VoteStore};

pub fn routes() -> Vec<Route> {
    routes![register, login, logout, me]
}

#[post("/auth/register", data = "<request>", format = "json")]
async fn register(
    request: Json<RegisterRequest>,
    store: &State<SharedStore>,
) -> Result<Json<UserDescription>> {
    let request = request.into_inner();
    request.validate()?;

    // Check uniqueness of the member number and email.
    if store
        .user_by_member_number(&request.member_number)
        .await?
        .is_some()
    {
        return Err(Error::BadRequest(format!(
            "Member number {} is already registered",
            request.member_number
        )));
    }
    if store.user_by_email(&request.email).await?.is_some() {
        return Err(Error::BadRequest(format!(
            "Email {} is already registered",
            request.email
        )));
    }

    let role = match request.role.as_deref() {
        Some("admin") => Rights::Admin,
        _ => Rights::Voter,
    };
    let user = store
        .insert_user(NewUser::new(
            request.member_number,
            request.first_names,
            request.last_names,
            request.email,
            &request.password,
            role,
        ))
        .await?;
    info!("Registered {} user {}", user.role, user.id);

    Ok(Json(UserDescription::from(user)))
}

#[post("/auth/login", data = "<credentials>", format = "json")]
async fn login(
    credentials: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    store: &State<SharedStore>,
    config: &State<Config>,
) -> Result<Json<UserDescription>> {
    let user = store
        .user_by_member_number(&credentials.member_number)
        .await?
        .filter(|user| user.verify_password(&credentials.password))
        .ok_or_else(|| {
            Error::Unauthorized(
                "No user found with the provided member number and password combination"
                    .to_string(),
            )
        })?;

    let token = AuthToken::<Voter>::new(&user);
    cookies.add(token.into_cookie(config));

    Ok(Json(UserDescription::from(user)))
}

#[post("/auth/logout")]
async fn logout(cookies: &CookieJar<'_>) {
    cookies.remove(Cookie::from(AUTH_TOKEN_COOKIE));
}

#[get("/auth/me")]
async fn me(token: AuthToken<Voter>, store: &State<SharedStore>) -> Result<Json<UserDescription>> {
    let user = store
        .user(token.id())
        .await?
        .ok_or_else(|| Error::NotFound(format!("No user found with ID {}", token.id())))?;
    Ok(Json(UserDescription::from(user)))
}

/// A new user the caller wants to register.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    member_number: String,
    first_names: String,
    last_names: String,
    email: String,
    password: String,
    role: Option<String>,
}

impl RegisterRequest {
    fn validate(&self) -> Result<()> {
        if self.member_number.trim().is_empty() {
            return Err(Error::BadRequest("Member number is required".to_string()));
        }
        if self.first_names.trim().is_empty() || self.last_names.trim().is_empty() {
            return Err(Error::BadRequest("Full name is required".to_string()));
        }
        if !self.email.contains('@') {
            return Err(Error::BadRequest("A valid email is required".to_string()));
        }
        if self.password.len() < 8 {
            return Err(Error::BadRequest(
                "Password must be at least 8 characters".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    member_number: String,
    password: String,
}

/// A user as returned by the API; never includes the password hash.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDescription {
    pub id: ApiId,
    pub member_number: String,
    pub first_names: String,
    pub last_names: String,
    pub email: String,
    pub role: String,
}

impl From<User> for UserDescription {
    fn from(user: User) -> Self {
        Self {
            id: user.id.into(),
            member_number: user.user.member_number,
            first_names: user.user.first_names,
            last_names: user.user.last_names,
            email: user.user.email,
            role: user.user.role.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use rocket::serde::json::serde_json;

    use crate::test_harness::{self, register_and_login};

    use super::*;

    #[rocket::async_test]
    async fn register_login_me() {
        let client = test_harness::client().await;

        // Register.
        let response = client
            .post(uri!(register))
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "memberNumber": "10234",
                    "firstNames": "Ana María",
                    "lastNames": "Morales",
                    "email": "ana@example.com",
                    "password": "a long password",
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let registered: UserDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(registered.role, "voter");

        // Login.
        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "memberNumber": "10234",
                    "password": "a long password",
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        // The cookie now authenticates us.
        let response = client.get(uri!(me)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let described: UserDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(described.member_number, "10234");
    }

    #[rocket::async_test]
    async fn bad_registrations_are_rejected() {
        let client = test_harness::client().await;

        // Short password.
        let response = client
            .post(uri!(register))
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "memberNumber": "1",
                    "firstNames": "A",
                    "lastNames": "B",
                    "email": "a@example.com",
                    "password": "short",
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        // Duplicate member number.
        register_and_login(&client, "77", "voter").await;
        let response = client
            .post(uri!(register))
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "memberNumber": "77",
                    "firstNames": "A",
                    "lastNames": "B",
                    "email": "other@example.com",
                    "password": "a long password",
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn wrong_credentials_are_rejected() {
        let client = test_harness::client().await;
        register_and_login(&client, "42", "voter").await;

        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "memberNumber": "42",
                    "password": "not the password",
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn me_requires_authentication() {
        let client = test_harness::client().await;
        let response = client.get(uri!(me)).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }
}
