//! Maps the bootstrap decision and the in-app sub-page to the active screen.

use shared::domain::TemplateType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedPage {
    SignIn,
    SignUp,
    CompanySetup,
    App,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppPage {
    Dashboard,
    TemplateSelect,
    InvoiceForm(TemplateType),
    History,
    Catalog,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarEntry {
    Dashboard,
    Create,
    History,
    Catalog,
    Settings,
}

impl SidebarEntry {
    pub const ALL: [SidebarEntry; 5] = [
        SidebarEntry::Dashboard,
        SidebarEntry::Create,
        SidebarEntry::History,
        SidebarEntry::Catalog,
        SidebarEntry::Settings,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SidebarEntry::Dashboard => "Dashboard",
            SidebarEntry::Create => "Create Invoice",
            SidebarEntry::History => "Invoice History",
            SidebarEntry::Catalog => "Company Catalog",
            SidebarEntry::Settings => "Settings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Loading,
    SignIn,
    SignUp,
    CompanySetup,
    Dashboard,
    TemplateSelect,
    InvoiceForm(TemplateType),
    History,
    Catalog,
    Settings,
}

/// `None` means the bootstrap check has not resolved yet.
pub fn route(resolved: Option<ResolvedPage>, app_page: AppPage) -> Screen {
    match resolved {
        None => Screen::Loading,
        Some(ResolvedPage::SignIn) => Screen::SignIn,
        Some(ResolvedPage::SignUp) => Screen::SignUp,
        Some(ResolvedPage::CompanySetup) => Screen::CompanySetup,
        Some(ResolvedPage::App) => match app_page {
            AppPage::Dashboard => Screen::Dashboard,
            AppPage::TemplateSelect => Screen::TemplateSelect,
            AppPage::InvoiceForm(template) => Screen::InvoiceForm(template),
            AppPage::History => Screen::History,
            AppPage::Catalog => Screen::Catalog,
            AppPage::Settings => Screen::Settings,
        },
    }
}

/// Template selection and the invoice form are both the "create" entry.
pub fn sidebar_highlight(app_page: AppPage) -> SidebarEntry {
    match app_page {
        AppPage::Dashboard => SidebarEntry::Dashboard,
        AppPage::TemplateSelect | AppPage::InvoiceForm(_) => SidebarEntry::Create,
        AppPage::History => SidebarEntry::History,
        AppPage::Catalog => SidebarEntry::Catalog,
        AppPage::Settings => SidebarEntry::Settings,
    }
}

/// In-app navigation state. Holds no business logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationRouter {
    page: AppPage,
}

impl Default for NavigationRouter {
    fn default() -> Self {
        Self {
            page: AppPage::Dashboard,
        }
    }
}

impl NavigationRouter {
    pub fn page(&self) -> AppPage {
        self.page
    }

    pub fn screen(&self, resolved: Option<ResolvedPage>) -> Screen {
        route(resolved, self.page)
    }

    pub fn highlighted(&self) -> SidebarEntry {
        sidebar_highlight(self.page)
    }

    /// "Create" always starts from the template gallery.
    pub fn navigate(&mut self, entry: SidebarEntry) {
        self.page = match entry {
            SidebarEntry::Dashboard => AppPage::Dashboard,
            SidebarEntry::Create => AppPage::TemplateSelect,
            SidebarEntry::History => AppPage::History,
            SidebarEntry::Catalog => AppPage::Catalog,
            SidebarEntry::Settings => AppPage::Settings,
        };
    }

    pub fn select_template(&mut self, template: TemplateType) {
        self.page = AppPage::InvoiceForm(template);
    }

    pub fn back_to_templates(&mut self) {
        self.page = AppPage::TemplateSelect;
    }

    /// Invoice creation finished or was cancelled.
    pub fn finish_invoice(&mut self) {
        self.page = AppPage::Dashboard;
    }
}
