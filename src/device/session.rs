use log::{debug, info, warn};

use super::transport::Request;
use super::{Device, DeviceError};

pub const LOGIN_PATH: &str = "/cgi-bin/postauth.cgi";
pub const LOGOUT_PATH: &str = "/cgi-bin/postlogout.cgi";

// ------------------------------------------------------------
// Session lifecycle
// ------------------------------------------------------------
//
//     Unauthenticated --login ok--> Authenticated
//     Authenticated   --logout-->   Unauthenticated  (always)
//
// Login on an authenticated device is an error; it never
// replaces the current cookie.
//
impl Device {
    /// Authenticates against the device and stores its session cookie.
    ///
    /// ERRORS:
    /// - `AlreadyAuthenticated` if a session is held (no request is sent)
    /// - `Authentication` on any status other than 200
    /// - `NoSession` if the response sets no cookie
    /// - `Transport` on network failure
    pub async fn login(&mut self) -> Result<(), DeviceError> {
        if self.session.is_some() {
            return Err(DeviceError::AlreadyAuthenticated);
        }

        let request = Request::post_form(
            LOGIN_PATH,
            vec![
                ("AccessVal", String::new()),
                ("LoginUser", self.credentials.user.clone()),
                ("LoginPass", self.credentials.password.clone()),
            ],
        );

        let response = self.transport.send(request).await?;
        if response.status != 200 {
            return Err(DeviceError::Authentication {
                status: response.status,
            });
        }

        // The first cookie is the session token; others are ignored.
        let cookie = response
            .cookies
            .into_iter()
            .next()
            .ok_or(DeviceError::NoSession)?;

        debug!("{}: session cookie {:?}", self.address, cookie.name);
        info!("{}: logged in as {}", self.address, self.credentials.user);

        self.session = Some(cookie);
        Ok(())
    }

    /// Ends the session. Best effort: never fails.
    ///
    /// The stored cookie is cleared and the transport reset whatever
    /// the device answers, so a following `login` starts clean.
    pub async fn logout(&mut self) {
        if let Some(cookie) = self.session.take() {
            let request = Request::post_form(LOGOUT_PATH, vec![("Logout", "1".to_string())])
                .with_cookie(Some(&cookie));

            match self.transport.send(request).await {
                Ok(response) if response.status == 200 => {
                    info!("{}: logged out", self.address)
                }
                Ok(response) => warn!(
                    "{}: logout answered with status {}, ignored",
                    self.address, response.status
                ),
                Err(e) => warn!("{}: logout failed, ignored: {e}", self.address),
            }
        }

        self.transport.reset();
    }
}
