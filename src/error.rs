use rocket::{http::Status, response::Responder, serde::json::Json, Request};
use serde::Serialize;
use thiserror::Error;

use crate::model::mongodb::Id;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    OidParse(#[from] mongodb::bson::oid::Error),
    #[error(transparent)]
    BsonValue(#[from] mongodb::bson::document::ValueAccessError),
    #[error("Campaign {0} not found")]
    CampaignNotFound(Id),
    #[error("Campaign {0} is not open for voting")]
    CampaignNotActive(Id),
    #[error("Campaign {0} is outside its voting window")]
    OutsideVotingWindow(Id),
    #[error("Candidate {0} not found in this campaign")]
    CandidateNotFound(Id),
    #[error("Already cast the maximum of {limit} votes allowed for this campaign")]
    QuotaExceeded { limit: u32 },
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// The HTTP status this error maps to.
    fn status(&self) -> Status {
        match self {
            Self::Db(_) | Self::BsonValue(_) => Status::InternalServerError,
            Self::Jwt(_) | Self::Unauthorized(_) => Status::Unauthorized,
            Self::OidParse(_) | Self::BadRequest(_) => Status::BadRequest,
            Self::CampaignNotActive(_) | Self::OutsideVotingWindow(_) | Self::QuotaExceeded { .. } => {
                Status::BadRequest
            }
            Self::CampaignNotFound(_) | Self::CandidateNotFound(_) | Self::NotFound(_) => {
                Status::NotFound
            }
        }
    }
}

/// The JSON body sent with every error response; rejections must always
/// reach the caller with a human-readable reason.
#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status == Status::InternalServerError {
            error!("{self}");
        } else {
            warn!("{self}");
        }

        let mut response = Json(ErrorBody {
            message: self.to_string(),
        })
        .respond_to(req)?;
        response.set_status(status);
        Ok(response)
    }
}
