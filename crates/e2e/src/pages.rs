//! Page objects for the controller UI
//!
//! A page object names a route and the locators on it; tests ask questions
//! of it (is this displayed, is that clickable) instead of driving the
//! browser directly. Every question loads the page afresh in its own
//! browser, so answers never depend on state left over from earlier calls.

#![allow(async_fn_in_trait)]

use serde_json::Value;

use crate::browser::{js, BrowserSession};
use crate::error::{E2eError, E2eResult};

/// JS predicate body testing `el` for visibility
const VISIBLE_JS: &str = "if (!el) return false; \
     const r = el.getBoundingClientRect(); \
     const s = window.getComputedStyle(el); \
     return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';";

/// An element located by a JS expression evaluating to a node or `null`
#[derive(Debug, Clone)]
pub struct Element<'a> {
    session: &'a BrowserSession,
    path: String,
    ready: Option<String>,
    locator: String,
    description: String,
}

impl<'a> Element<'a> {
    pub fn new(
        session: &'a BrowserSession,
        path: &str,
        ready: Option<&str>,
        locator: String,
        description: &str,
    ) -> Self {
        Self {
            session,
            path: path.to_string(),
            ready: ready.map(String::from),
            locator,
            description: description.to_string(),
        }
    }

    /// First element matching a CSS selector
    pub fn css(session: &'a BrowserSession, path: &str, ready: Option<&str>, selector: &str) -> Self {
        Self::new(
            session,
            path,
            ready,
            format!("document.querySelector({})", js(selector)),
            selector,
        )
    }

    /// First descendant of this element matching a CSS selector
    pub fn child(&self, selector: &str) -> Element<'a> {
        Element {
            session: self.session,
            path: self.path.clone(),
            ready: self.ready.clone(),
            locator: format!(
                "(() => {{ const parent = {}; return parent ? parent.querySelector({}) : null; }})()",
                self.locator,
                js(selector)
            ),
            description: format!("{} {}", self.description, selector),
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Wrap `body` in a function that sees the element as `el`
    pub fn script(&self, body: &str) -> String {
        format!("(() => {{ const el = {}; {} }})()", self.locator, body)
    }

    async fn eval(&self, body: &str) -> E2eResult<Value> {
        self.session
            .query(&self.path, self.ready.as_deref(), &self.script(body))
            .await
    }

    pub async fn exists(&self) -> E2eResult<bool> {
        Ok(self.eval("return el !== null && el !== undefined;").await? == Value::Bool(true))
    }

    /// Rendered with a non-empty box and not hidden by style
    pub async fn is_displayed(&self) -> E2eResult<bool> {
        Ok(self.eval(VISIBLE_JS).await? == Value::Bool(true))
    }

    /// Displayed, enabled and accepting pointer events
    pub async fn is_clickable(&self) -> E2eResult<bool> {
        let body = format!(
            "const visible = (() => {{ {} }})(); \
             if (!visible) return false; \
             const s = window.getComputedStyle(el); \
             return !el.disabled && el.getAttribute('aria-disabled') !== 'true' && s.pointerEvents !== 'none';",
            VISIBLE_JS
        );
        Ok(self.eval(&body).await? == Value::Bool(true))
    }

    /// Trimmed visible text
    pub async fn text(&self) -> E2eResult<String> {
        match self
            .eval("if (!el) return null; return (el.innerText || el.textContent || '').trim();")
            .await?
        {
            Value::String(text) => Ok(text),
            _ => Err(E2eError::Page(format!("element not found: {}", self.description))),
        }
    }

    pub async fn click(&self) -> E2eResult<()> {
        let body = format!(
            "if (!el) throw new Error('element not found: ' + {}); el.click(); return true;",
            js(&self.description)
        );
        self.eval(&body).await?;
        Ok(())
    }
}

/// Capabilities shared by every page object
pub trait Page {
    fn session(&self) -> &BrowserSession;

    /// Route relative to the controller URL, e.g. `/#/organizations`
    fn path(&self) -> &str;

    /// Selector that is present once the page has rendered
    fn ready_selector(&self) -> Option<&str> {
        None
    }

    fn locate(&self, selector: &str) -> Element<'_> {
        Element::css(self.session(), self.path(), self.ready_selector(), selector)
    }

    async fn evaluate(&self, expression: &str) -> E2eResult<Value> {
        self.session()
            .query(self.path(), self.ready_selector(), expression)
            .await
    }

    async fn text(&self, selector: &str) -> E2eResult<String> {
        self.locate(selector).text().await
    }

    async fn is_displayed(&self, selector: &str) -> E2eResult<bool> {
        self.locate(selector).is_displayed().await
    }

    async fn is_clickable(&self, selector: &str) -> E2eResult<bool> {
        self.locate(selector).is_clickable().await
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        self.locate(selector).click().await
    }
}

/// The login form
pub struct LoginPage<'a> {
    session: &'a BrowserSession,
}

impl<'a> LoginPage<'a> {
    pub const PATH: &'static str = "/#/login";
    pub const USERNAME: &'static str = "#login-username";
    pub const PASSWORD: &'static str = "#login-password";
    pub const SUBMIT: &'static str = "#login-button";

    /// `session` should carry no cookies, or the form is never shown
    pub fn new(session: &'a BrowserSession) -> Self {
        Self { session }
    }

    pub async fn is_the_current_page(&self) -> E2eResult<bool> {
        self.is_displayed(Self::SUBMIT).await
    }

    /// Submit credentials and wait until the UI navigates away from the form
    pub async fn login(&self, username: &str, password: &str) -> E2eResult<()> {
        let actions = format!(
            "    await page.fill({user_sel}, {user});\n\
             \x20   await page.fill({pass_sel}, {pass});\n\
             \x20   await page.click({submit});\n\
             \x20   await page.waitForURL(url => !url.toString().includes('/login'));\n\
             \x20   result = page.url();\n",
            user_sel = js(Self::USERNAME),
            user = js(username),
            pass_sel = js(Self::PASSWORD),
            pass = js(password),
            submit = js(Self::SUBMIT),
        );
        self.session
            .perform(Self::PATH, Some(Self::SUBMIT), &actions)
            .await?;
        Ok(())
    }
}

impl Page for LoginPage<'_> {
    fn session(&self) -> &BrowserSession {
        self.session
    }

    fn path(&self) -> &str {
        Self::PATH
    }

    fn ready_selector(&self) -> Option<&str> {
        Some(Self::SUBMIT)
    }
}

/// Card list of organizations
pub struct OrganizationsPage<'a> {
    session: &'a BrowserSession,
}

impl<'a> OrganizationsPage<'a> {
    pub const PATH: &'static str = "/#/organizations";
    pub const CARD: &'static str = ".OrgCards-card";
    pub const CARD_LABEL: &'static str = ".OrgCards-label";
    pub const BADGE: &'static str = ".at-Panel-headingTitleBadge";
    pub const ADD_BUTTON: &'static str = "#button-add";
    pub const EDIT_ACTION: &'static str = ".OrgCards-actionItem--edit";
    pub const DELETE_ACTION: &'static str = ".OrgCards-actionItem--delete";
    pub const LINK: &'static str = ".OrgCards-link";
    pub const LINK_NAME: &'static str = ".OrgCards-linkName";

    pub fn new(session: &'a BrowserSession) -> Self {
        Self { session }
    }

    /// Labels of the visible cards, in display order
    pub async fn displayed_card_labels(&self) -> E2eResult<Vec<String>> {
        let expression = format!(
            "Array.from(document.querySelectorAll({card})) \
             .filter(el => {{ {visible} }}) \
             .map(card => {{ const label = card.querySelector({label}); \
             return ((label || card).innerText || '').trim(); }})",
            card = js(Self::CARD),
            visible = VISIBLE_JS,
            label = js(Self::CARD_LABEL),
        );
        Ok(serde_json::from_value(self.evaluate(&expression).await?)?)
    }

    /// Count shown in the panel heading badge
    pub async fn badge_number(&self) -> E2eResult<u64> {
        let text = self.text(Self::BADGE).await?;
        text.trim()
            .parse()
            .map_err(|_| E2eError::Page(format!("badge text '{}' is not a number", text)))
    }

    pub fn add_button(&self) -> Element<'_> {
        self.locate(Self::ADD_BUTTON)
    }

    /// Card whose label matches `name`, compared case-insensitively
    pub fn get_card(&self, name: &str) -> OrganizationCard<'_> {
        let locator = format!(
            "(Array.from(document.querySelectorAll({card})).find(card => {{ \
             const label = card.querySelector({label}); \
             return label && label.innerText.trim().toLowerCase() === {name}; }}) || null)",
            card = js(Self::CARD),
            label = js(Self::CARD_LABEL),
            name = js(&name.to_lowercase()),
        );
        OrganizationCard {
            page: self,
            element: Element::new(
                self.session,
                Self::PATH,
                self.ready_selector(),
                locator,
                &format!("organization card '{}'", name),
            ),
        }
    }
}

impl Page for OrganizationsPage<'_> {
    fn session(&self) -> &BrowserSession {
        self.session
    }

    fn path(&self) -> &str {
        Self::PATH
    }

    fn ready_selector(&self) -> Option<&str> {
        Some(Self::CARD)
    }
}

/// One organization's card
pub struct OrganizationCard<'p> {
    page: &'p OrganizationsPage<'p>,
    element: Element<'p>,
}

impl<'p> OrganizationCard<'p> {
    pub fn element(&self) -> &Element<'p> {
        &self.element
    }

    pub async fn is_displayed(&self) -> E2eResult<bool> {
        self.element.is_displayed().await
    }

    pub fn edit(&self) -> Element<'p> {
        self.element.child(OrganizationsPage::EDIT_ACTION)
    }

    pub fn delete(&self) -> Element<'p> {
        self.element.child(OrganizationsPage::DELETE_ACTION)
    }

    /// Names of the visible related-resource links, in display order
    pub async fn displayed_link_names(&self) -> E2eResult<Vec<String>> {
        let body = format!(
            "if (!el) return null; \
             return Array.from(el.querySelectorAll({link})) \
             .filter(el => {{ {visible} }}) \
             .map(link => {{ const name = link.querySelector({name}); \
             return ((name || link).innerText || '').trim(); }});",
            link = js(OrganizationsPage::LINK),
            visible = VISIBLE_JS,
            name = js(OrganizationsPage::LINK_NAME),
        );
        match self.page.evaluate(&self.element.script(&body)).await? {
            Value::Null => Err(E2eError::Page(format!(
                "{} not found",
                self.element.description()
            ))),
            names => Ok(serde_json::from_value(names)?),
        }
    }

    /// Link whose name matches `name`, compared case-insensitively
    pub fn get_link(&self, name: &str) -> Element<'p> {
        let locator = format!(
            "(() => {{ const card = {card}; if (!card) return null; \
             return Array.from(card.querySelectorAll({link})).find(link => {{ \
             const label = link.querySelector({label}) || link; \
             return (label.innerText || '').trim().toLowerCase() === {name}; }}) || null; }})()",
            card = self.element.locator(),
            link = js(OrganizationsPage::LINK),
            label = js(OrganizationsPage::LINK_NAME),
            name = js(&name.to_lowercase()),
        );
        Element::new(
            self.page.session,
            OrganizationsPage::PATH,
            self.page.ready_selector(),
            locator,
            &format!("{} link '{}'", self.element.description(), name),
        )
    }
}
