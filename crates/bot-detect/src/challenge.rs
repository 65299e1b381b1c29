use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use shopguard_common::{ChallengeConfig, SecurityContext};

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying a solved challenge.
pub const CLEARANCE_COOKIE: &str = "__sg_clearance";

/// Allowed clock skew for challenges issued "in the future".
const MAX_SKEW_SECS: u64 = 60;

/// Issues proof-of-work challenges and verifies the clearance cookies they
/// produce.
///
/// The page asks the browser to find a nonce such that
/// `SHA-256("{ip}:{ts}:{sig}:{nonce}")` starts with `difficulty` zero bits,
/// where `sig` is an HMAC over `{ip}:{ts}`. The solution is stored in the
/// cookie as `{ts}.{nonce}.{sig}` and the page reloads itself.
pub struct ChallengeIssuer {
    secret: String,
    difficulty: u32,
    ttl_secs: u64,
}

impl ChallengeIssuer {
    pub fn new(config: &ChallengeConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            difficulty: config.difficulty.min(32),
            ttl_secs: config.ttl_secs,
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Render the challenge page for `client_ip`.
    pub fn issue(&self, client_ip: IpAddr) -> String {
        self.issue_at(client_ip, unix_now())
    }

    pub fn issue_at(&self, client_ip: IpAddr, timestamp: u64) -> String {
        let sig = self.sign(client_ip, timestamp);
        let challenge = format!("{}:{}:{}", client_ip, timestamp, sig);

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<title>Checking your browser...</title>
<meta name="robots" content="noindex">
<style>
body {{ font-family: -apple-system, sans-serif; display: flex; justify-content: center;
  align-items: center; min-height: 100vh; margin: 0; background: #fafafa; color: #222; }}
.container {{ text-align: center; max-width: 420px; }}
.spinner {{ width: 40px; height: 40px; border: 3px solid #ddd; border-top: 3px solid #2563eb;
  border-radius: 50%; animation: spin 1s linear infinite; margin: 20px auto; }}
@keyframes spin {{ to {{ transform: rotate(360deg); }} }}
p {{ color: #666; font-size: 14px; }}
</style>
</head>
<body>
<div class="container">
  <h2>One moment while we check your browser</h2>
  <div class="spinner"></div>
  <p id="status">Running security check...</p>
  <noscript><p>Please enable JavaScript to continue.</p></noscript>
</div>
<script>
(async function() {{
  const challenge = "{challenge}";
  const difficulty = {difficulty};
  const ts = "{timestamp}";
  const sig = "{sig}";

  async function sha256(msg) {{
    const data = new TextEncoder().encode(msg);
    const buf = await crypto.subtle.digest('SHA-256', data);
    return new Uint8Array(buf);
  }}

  function leadingZeroBits(bytes) {{
    let bits = 0;
    for (const b of bytes) {{
      if (b === 0) {{ bits += 8; continue; }}
      bits += Math.clz32(b) - 24;
      break;
    }}
    return bits;
  }}

  const statusEl = document.getElementById('status');
  let nonce = 0;
  while (true) {{
    const digest = await sha256(challenge + ':' + nonce);
    if (leadingZeroBits(digest) >= difficulty) break;
    nonce++;
    if (nonce % 1000 === 0) {{
      statusEl.textContent = 'Verifying... (' + nonce + ')';
      await new Promise(r => setTimeout(r, 0));
    }}
  }}

  document.cookie = '{cookie}=' + ts + '.' + nonce + '.' + sig +
    ';path=/;max-age={ttl};SameSite=Lax';
  statusEl.textContent = 'Done. Reloading...';
  setTimeout(function() {{ window.location.reload(); }}, 300);
}})();
</script>
</body>
</html>"#,
            challenge = challenge,
            difficulty = self.difficulty,
            timestamp = timestamp,
            sig = sig,
            cookie = CLEARANCE_COOKIE,
            ttl = self.ttl_secs,
        )
    }

    /// Whether the request carries a valid clearance cookie for its address.
    pub fn has_clearance(&self, ctx: &SecurityContext) -> bool {
        ctx.cookie(CLEARANCE_COOKIE)
            .map(|value| self.verify_at(value, ctx.ip_address, unix_now()))
            .unwrap_or(false)
    }

    /// Verify a clearance cookie value: signature, age and proof of work.
    pub fn verify_at(&self, cookie: &str, client_ip: IpAddr, now: u64) -> bool {
        let mut parts = cookie.splitn(3, '.');
        let (Some(ts), Some(nonce), Some(sig)) = (parts.next(), parts.next(), parts.next()) else {
            return false;
        };

        let Ok(timestamp) = ts.parse::<u64>() else {
            return false;
        };
        if timestamp > now + MAX_SKEW_SECS || now.saturating_sub(timestamp) > self.ttl_secs {
            return false;
        }
        if nonce.is_empty() || !nonce.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }

        let Ok(sig_bytes) = hex::decode(sig) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(format!("{}:{}", client_ip, timestamp).as_bytes());
        if mac.verify_slice(&sig_bytes).is_err() {
            return false;
        }

        let digest = Sha256::digest(format!("{}:{}:{}:{}", client_ip, timestamp, sig, nonce));
        leading_zero_bits(&digest) >= self.difficulty
    }

    fn sign(&self, client_ip: IpAddr, timestamp: u64) -> String {
        let mut mac = self.mac();
        mac.update(format!("{}:{}", client_ip, timestamp).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC can take key of any size")
    }
}

fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut bits = 0;
    for b in bytes {
        if *b == 0 {
            bits += 8;
            continue;
        }
        bits += b.leading_zeros();
        break;
    }
    bits
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(difficulty: u32) -> ChallengeIssuer {
        ChallengeIssuer::new(&ChallengeConfig {
            difficulty,
            ttl_secs: 3600,
            secret: "test-secret".to_string(),
        })
    }

    /// Solve the challenge the way the browser script does.
    fn solve(issuer: &ChallengeIssuer, ip: IpAddr, ts: u64) -> String {
        let sig = issuer.sign(ip, ts);
        let nonce = (0u64..)
            .find(|n| {
                let digest = Sha256::digest(format!("{}:{}:{}:{}", ip, ts, sig, n));
                leading_zero_bits(&digest) >= issuer.difficulty
            })
            .unwrap();
        format!("{}.{}.{}", ts, nonce, sig)
    }

    #[test]
    fn test_page_contents() {
        let html = issuer(16).issue_at("192.0.2.1".parse().unwrap(), 1_700_000_000);
        assert!(html.contains("<!DOCTYPE html>"));
        assert!(html.contains(CLEARANCE_COOKIE));
        assert!(html.contains("crypto.subtle.digest"));
        assert!(html.contains("window.location.reload"));
        assert!(html.contains("const difficulty = 16;"));
    }

    #[test]
    fn test_solved_cookie_verifies() {
        let issuer = issuer(8);
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let cookie = solve(&issuer, ip, 1_700_000_000);
        assert!(issuer.verify_at(&cookie, ip, 1_700_000_100));
    }

    #[test]
    fn test_cookie_bound_to_ip() {
        let issuer = issuer(8);
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let cookie = solve(&issuer, ip, 1_700_000_000);
        assert!(!issuer.verify_at(&cookie, "192.0.2.2".parse().unwrap(), 1_700_000_100));
    }

    #[test]
    fn test_expired_cookie_rejected() {
        let issuer = issuer(8);
        let ip: IpAddr = "2001:db8::1".parse().unwrap();
        let cookie = solve(&issuer, ip, 1_700_000_000);
        assert!(!issuer.verify_at(&cookie, ip, 1_700_000_000 + 7200));
    }

    #[test]
    fn test_unsolved_or_forged_cookie_rejected() {
        let issuer = issuer(24);
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let sig = issuer.sign(ip, 1_700_000_000);

        // Valid signature but a nonce that almost certainly misses 24 bits.
        assert!(!issuer.verify_at(&format!("1700000000.0.{}", sig), ip, 1_700_000_010));
        assert!(!issuer.verify_at("1700000000.0.deadbeef", ip, 1_700_000_010));
        assert!(!issuer.verify_at("garbage", ip, 1_700_000_010));
    }

    #[test]
    fn test_has_clearance_reads_cookie() {
        let issuer = issuer(4);
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let cookie = solve(&issuer, ip, unix_now());
        let ctx = SecurityContext::new(ip, "GET", "/")
            .with_header("Cookie", &format!("cart=1; {}={}", CLEARANCE_COOKIE, cookie));
        assert!(issuer.has_clearance(&ctx));

        let bare = SecurityContext::new(ip, "GET", "/");
        assert!(!issuer.has_clearance(&bare));
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0, 0, 0x10]), 19);
        assert_eq!(leading_zero_bits(&[0x80]), 0);
        assert_eq!(leading_zero_bits(&[0, 0x01]), 15);
    }
}
