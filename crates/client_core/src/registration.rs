//! Sign-up form state and client-side validation.

use std::{collections::BTreeMap, fmt, sync::OnceLock};

use regex::Regex;
use shared::{
    domain::Role,
    protocol::{RegisterUserRequest, RegisteredUser},
};
use tracing::{info, warn};

use crate::{error::ClientError, AccountApi};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormField {
    FirstName,
    LastName,
    Username,
    Email,
    Password,
    ConfirmPassword,
    AcceptTerms,
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FirstName => "firstName",
            Self::LastName => "lastName",
            Self::Username => "username",
            Self::Email => "email",
            Self::Password => "password",
            Self::ConfirmPassword => "confirmPassword",
            Self::AcceptTerms => "acceptTerms",
        };
        f.write_str(name)
    }
}

pub type FieldErrors = BTreeMap<FormField, String>;

#[derive(Debug)]
pub enum SubmitOutcome {
    Registered(RegisteredUser),
    Invalid(FieldErrors),
    Rejected(String),
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub accept_terms: bool,
    errors: FieldErrors,
    form_error: Option<String>,
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"\S+@\S+\.\S+").expect("email pattern compiles"))
}

impl RegistrationForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates a text field and clears its error. `AcceptTerms` takes any
    /// value other than "", "false" or "off" as checked.
    pub fn set_field(&mut self, field: FormField, value: impl Into<String>) {
        let value = value.into();
        match field {
            FormField::FirstName => self.first_name = value,
            FormField::LastName => self.last_name = value,
            FormField::Username => self.username = value,
            FormField::Email => self.email = value,
            FormField::Password => self.password = value,
            FormField::ConfirmPassword => self.confirm_password = value,
            FormField::AcceptTerms => {
                self.accept_terms = !matches!(value.trim(), "" | "false" | "off");
            }
        }
        self.errors.remove(&field);
    }

    pub fn set_accept_terms(&mut self, accepted: bool) {
        self.accept_terms = accepted;
        self.errors.remove(&FormField::AcceptTerms);
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn error(&self, field: FormField) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    pub fn form_error(&self) -> Option<&str> {
        self.form_error.as_deref()
    }

    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();

        if self.first_name.trim().is_empty() {
            errors.insert(FormField::FirstName, "First name is required".into());
        }

        if self.last_name.trim().is_empty() {
            errors.insert(FormField::LastName, "Last name is required".into());
        }

        if self.username.trim().is_empty() {
            errors.insert(FormField::Username, "Username is required".into());
        } else if self.username.contains(' ') {
            errors.insert(FormField::Username, "Username cannot contain spaces".into());
        }

        if self.email.trim().is_empty() {
            errors.insert(FormField::Email, "Email is required".into());
        } else if !email_pattern().is_match(&self.email) {
            errors.insert(FormField::Email, "Email is invalid".into());
        }

        if self.password.is_empty() {
            errors.insert(FormField::Password, "Password is required".into());
        } else if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.insert(
                FormField::Password,
                format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            );
        }

        if self.password != self.confirm_password {
            errors.insert(FormField::ConfirmPassword, "Passwords do not match".into());
        }

        if !self.accept_terms {
            errors.insert(
                FormField::AcceptTerms,
                "You must accept the terms and conditions".into(),
            );
        }

        errors
    }

    pub fn to_request(&self) -> RegisterUserRequest {
        RegisterUserRequest {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
            bio: String::new(),
            profile_image: None,
            role: Role::User,
        }
    }

    pub async fn submit(&mut self, api: &dyn AccountApi) -> SubmitOutcome {
        let errors = self.validate();
        self.form_error = None;
        if !errors.is_empty() {
            self.errors = errors.clone();
            return SubmitOutcome::Invalid(errors);
        }

        match api.register_user(&self.to_request()).await {
            Ok(user) => {
                info!("registered user {} ({})", user.username, user.user_id);
                SubmitOutcome::Registered(user)
            }
            Err(err) => {
                warn!("registration failed: {err}");
                let message = match err {
                    ClientError::Api(rejection) => rejection.message,
                    other => other.to_string(),
                };
                self.form_error = Some(message.clone());
                SubmitOutcome::Rejected(message)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/registration_tests.rs"]
mod tests;
